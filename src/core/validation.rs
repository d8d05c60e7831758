use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::types::{
    AccountBalance, AccountType, EventDetails, EventType, FinancialEvent, FlowField, Frequency, Goal,
    GoalOutcome, Holding, MonthlySnapshot, SimulationConfig, SimulationInput, SimulationOutput,
    StrategyKind, StructuredBalance, WithdrawalStrategy,
};

/// Largest tolerated gap between `finalNetWorth` and the last month's `netWorth`.
pub const NET_WORTH_EPSILON: f64 = 1.0;

const FLOW_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

pub fn validate_input(candidate: &Value) -> ValidationResult<SimulationInput> {
    let Some(root) = candidate.as_object() else {
        return Err(vec![ValidationError::new(
            "$",
            format!("expected a JSON object, got {}", describe(candidate)),
        )]);
    };

    let mut errors = Vec::new();
    let initial_accounts = parse_accounts(root.get("initialAccounts"), "initialAccounts", &mut errors);
    let events = parse_events(root.get("events"), &mut errors);
    let config = parse_config(root.get("config"), &mut errors);
    let months_to_run = parse_months_to_run(root.get("monthsToRun"), &mut errors);
    let withdrawal_strategy = parse_withdrawal_strategy(root.get("withdrawalStrategy"), &mut errors);
    let goals = parse_goals(root.get("goals"), &mut errors);

    match (initial_accounts, events, config, months_to_run, withdrawal_strategy, goals) {
        (Some(initial_accounts), Some(events), Some(config), Some(months_to_run), Some(strategy), Some(goals))
            if errors.is_empty() =>
        {
            for event in events.iter().filter(|e| e.month_offset >= months_to_run) {
                warn!(
                    event_id = %event.id,
                    month_offset = event.month_offset,
                    months_to_run,
                    "event starts after the simulation horizon and has no effect"
                );
            }
            for goal in goals.iter().filter(|g| g.target_month >= months_to_run) {
                warn!(
                    goal_id = %goal.id,
                    target_month = goal.target_month,
                    months_to_run,
                    "goal targets a month beyond the simulation horizon"
                );
            }
            Ok(SimulationInput {
                initial_accounts,
                events,
                config,
                months_to_run,
                withdrawal_strategy: strategy,
                goals,
            })
        }
        _ => Err(errors),
    }
}

/// Checks an engine reply against the SimulationOutput shape.
///
/// `months_to_run` is the horizon the engine was asked for; a successful reply
/// must carry exactly that many months.
pub fn validate_output(candidate: &Value, months_to_run: u32) -> ValidationResult<SimulationOutput> {
    let Some(root) = candidate.as_object() else {
        return Err(vec![ValidationError::new(
            "$",
            format!("expected a JSON object, got {}", describe(candidate)),
        )]);
    };

    let mut errors = Vec::new();
    let success = match root.get("success") {
        Some(Value::Bool(flag)) => Some(*flag),
        None => {
            errors.push(ValidationError::new("success", "is required"));
            None
        }
        Some(other) => {
            errors.push(ValidationError::new(
                "success",
                format!("must be a boolean, got {}", describe(other)),
            ));
            None
        }
    };
    let succeeded = success == Some(true);

    let error = match root.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(message.clone()),
        Some(other) => {
            errors.push(ValidationError::new(
                "error",
                format!("must be a string, got {}", describe(other)),
            ));
            None
        }
    };

    let mut entries_parsed = true;
    let monthly_data: Vec<MonthlySnapshot> = match root.get("monthlyData") {
        None | Some(Value::Null) => {
            if succeeded {
                errors.push(ValidationError::new(
                    "monthlyData",
                    "is required when success is true",
                ));
            }
            Vec::new()
        }
        Some(Value::Array(entries)) => {
            if succeeded && entries.len() != months_to_run as usize {
                errors.push(ValidationError::new(
                    "monthlyData",
                    format!(
                        "expected {months_to_run} monthly entries, got {}",
                        entries.len()
                    ),
                ));
            }
            let parsed: Vec<MonthlySnapshot> = entries
                .iter()
                .enumerate()
                .filter_map(|(index, entry)| parse_snapshot(entry, index, &mut errors))
                .collect();
            entries_parsed = parsed.len() == entries.len();
            parsed
        }
        Some(other) => {
            errors.push(ValidationError::new(
                "monthlyData",
                format!("must be an array, got {}", describe(other)),
            ));
            Vec::new()
        }
    };

    let final_net_worth = if succeeded {
        required_finite(root.get("finalNetWorth"), "finalNetWorth", &mut errors)
    } else {
        optional_finite(root.get("finalNetWorth"), "finalNetWorth", &mut errors)
    };
    // Only meaningful when the last entry is the engine's real last month.
    if let (Some(final_value), Some(last), true) =
        (final_net_worth, monthly_data.last(), entries_parsed)
    {
        if (final_value - last.net_worth).abs() >= NET_WORTH_EPSILON {
            errors.push(ValidationError::new(
                "finalNetWorth",
                format!(
                    "{final_value} differs from last monthlyData netWorth {} by more than {NET_WORTH_EPSILON}",
                    last.net_worth
                ),
            ));
        }
    }

    let goal_outcomes = parse_goal_outcomes(root.get("goalOutcomes"), &mut errors);
    let success_probability =
        optional_finite(root.get("successProbability"), "successProbability", &mut errors);
    if let Some(p) = success_probability {
        if !(0.0..=1.0).contains(&p) {
            errors.push(ValidationError::new(
                "successProbability",
                format!("must be between 0 and 1, got {p}"),
            ));
        }
    }

    match success {
        Some(success) if errors.is_empty() => Ok(SimulationOutput {
            success,
            error,
            monthly_data,
            final_net_worth,
            goal_outcomes,
            success_probability,
        }),
        _ => Err(errors),
    }
}

/// Reports months where active events should have moved a flow field but the
/// engine left it at zero. Income nets signed amounts, so offsetting income
/// events in one month expect zero.
pub fn check_flow_integrity(
    input: &SimulationInput,
    output: &SimulationOutput,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (index, snapshot) in output.monthly_data.iter().enumerate() {
        let month = index as u32;
        let mut expected: Vec<(FlowField, f64, Vec<&FinancialEvent>)> = Vec::new();
        for event in &input.events {
            if event.amount == 0.0 || !event.is_active(month) {
                continue;
            }
            let field = event.event_type().flow_field();
            let amount = match field {
                FlowField::Income => event.amount,
                _ => event.amount.abs(),
            };
            match expected.iter_mut().find(|(f, _, _)| *f == field) {
                Some((_, total, events)) => {
                    *total += amount;
                    events.push(event);
                }
                None => expected.push((field, amount, vec![event])),
            }
        }

        for (field, total, events) in expected {
            if total.abs() <= FLOW_EPSILON || field.value(snapshot) != 0.0 {
                continue;
            }
            let active = events
                .iter()
                .map(|event| format!("'{}' ({})", event.id, event.event_type().tag()))
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(ValidationError::new(
                format!("monthlyData[{index}].{}", field.key()),
                format!("is zero while events expecting {total} are active: {active}"),
            ));
        }
    }
    errors
}

pub(crate) fn parse_event(
    value: &Value,
    path: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<FinancialEvent> {
    let Some(record) = value.as_object() else {
        errors.push(ValidationError::new(
            path,
            format!("must be an object, got {}", describe(value)),
        ));
        return None;
    };

    let id = required_string(record.get("id"), &format!("{path}.id"), errors);
    let event_type = match record.get("type") {
        Some(Value::String(tag)) => match EventType::parse(tag) {
            Some(kind) => Some(kind),
            None => {
                errors.push(ValidationError::new(
                    format!("{path}.type"),
                    format!("unknown event type '{tag}'"),
                ));
                None
            }
        },
        Some(other) => {
            errors.push(ValidationError::new(
                format!("{path}.type"),
                format!("must be a string, got {}", describe(other)),
            ));
            None
        }
        None => {
            errors.push(ValidationError::new(format!("{path}.type"), "is required"));
            None
        }
    };
    let month_offset = required_index(record.get("monthOffset"), &format!("{path}.monthOffset"), errors);
    let amount = required_finite(record.get("amount"), &format!("{path}.amount"), errors);

    let metadata_path = format!("{path}.metadata");
    let metadata = match record.get("metadata") {
        None | Some(Value::Null) => Some(Value::Object(Map::new())),
        Some(value @ Value::Object(_)) => Some(value.clone()),
        Some(other) => {
            errors.push(ValidationError::new(
                &metadata_path,
                format!("must be an object, got {}", describe(other)),
            ));
            None
        }
    };

    let details = match (event_type, metadata) {
        (Some(kind), Some(metadata)) => match EventDetails::from_metadata(kind, metadata) {
            Ok(details) => Some(details),
            Err(err) => {
                errors.push(ValidationError::new(&metadata_path, err.to_string()));
                None
            }
        },
        _ => None,
    };

    let (id, month_offset, amount, details) = (id?, month_offset?, amount?, details?);
    let before = errors.len();
    check_schedule(&details, month_offset, &metadata_path, errors);
    if errors.len() > before {
        return None;
    }

    Some(FinancialEvent {
        id,
        month_offset,
        amount,
        details,
    })
}

fn check_schedule(
    details: &EventDetails,
    month_offset: u32,
    metadata_path: &str,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(end) = details.end_month_offset() {
        if end < month_offset {
            errors.push(ValidationError::new(
                format!("{metadata_path}.endMonthOffset"),
                format!("must be >= monthOffset ({month_offset}), got {end}"),
            ));
        }
    }
    match details {
        EventDetails::MegaBackdoorRoth(d) => {
            if let Some(limit) = d.annual_limit {
                if !limit.is_finite() || limit < 0.0 {
                    errors.push(ValidationError::new(
                        format!("{metadata_path}.annualLimit"),
                        format!("must be a non-negative amount, got {limit}"),
                    ));
                }
            }
        }
        EventDetails::OneTimeExpense(d) => {
            if let Some(frequency) = d.frequency.filter(|f| *f != Frequency::Once) {
                errors.push(ValidationError::new(
                    format!("{metadata_path}.frequency"),
                    format!("must be 'once' for a one-time expense, got {frequency:?}"),
                ));
            }
        }
        EventDetails::DisabilityInsurancePayout(d) => {
            if d.benefit_period_months == Some(0) {
                errors.push(ValidationError::new(
                    format!("{metadata_path}.benefitPeriodMonths"),
                    "must be at least 1",
                ));
            }
        }
        _ => {}
    }
}

fn parse_events(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Option<Vec<FinancialEvent>> {
    let entries = match value {
        Some(Value::Array(entries)) => entries,
        None => {
            errors.push(ValidationError::new("events", "is required"));
            return None;
        }
        Some(other) => {
            errors.push(ValidationError::new(
                "events",
                format!("must be an array, got {}", describe(other)),
            ));
            return None;
        }
    };

    let before = errors.len();
    let mut seen = HashSet::new();
    let mut events = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let path = format!("events[{index}]");
        if let Some(event) = parse_event(entry, &path, errors) {
            if !seen.insert(event.id.clone()) {
                errors.push(ValidationError::new(
                    format!("{path}.id"),
                    format!("duplicate event id '{}'", event.id),
                ));
                continue;
            }
            events.push(event);
        }
    }
    (errors.len() == before).then_some(events)
}

fn parse_config(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Option<SimulationConfig> {
    let record = match value {
        Some(Value::Object(record)) => record,
        None => {
            errors.push(ValidationError::new("config", "is required"));
            return None;
        }
        Some(other) => {
            errors.push(ValidationError::new(
                "config",
                format!("must be an object, got {}", describe(other)),
            ));
            return None;
        }
    };

    let expected_returns = parse_rate_map(record.get("expectedReturns"), "config.expectedReturns", false, errors);
    let volatilities = parse_rate_map(record.get("volatilities"), "config.volatilities", true, errors);
    Some(SimulationConfig {
        expected_returns: expected_returns?,
        volatilities: volatilities?,
    })
}

fn parse_rate_map(
    value: Option<&Value>,
    path: &str,
    non_negative: bool,
    errors: &mut Vec<ValidationError>,
) -> Option<BTreeMap<String, f64>> {
    let record = match value {
        Some(Value::Object(record)) => record,
        None => {
            errors.push(ValidationError::new(path, "is required"));
            return None;
        }
        Some(other) => {
            errors.push(ValidationError::new(
                path,
                format!("must be an object of asset class to rate, got {}", describe(other)),
            ));
            return None;
        }
    };

    let before = errors.len();
    let mut rates = BTreeMap::new();
    for (asset_class, rate) in record {
        let rate_path = format!("{path}.{asset_class}");
        if let Some(rate) = required_finite(Some(rate), &rate_path, errors) {
            if non_negative && rate < 0.0 {
                errors.push(ValidationError::new(
                    rate_path,
                    format!("must not be negative, got {rate}"),
                ));
                continue;
            }
            rates.insert(asset_class.clone(), rate);
        }
    }
    (errors.len() == before).then_some(rates)
}

fn parse_months_to_run(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Option<u32> {
    match required_index(value, "monthsToRun", errors) {
        Some(0) => {
            errors.push(ValidationError::new(
                "monthsToRun",
                "must be a positive integer, got 0",
            ));
            None
        }
        other => other,
    }
}

fn parse_withdrawal_strategy(
    value: Option<&Value>,
    errors: &mut Vec<ValidationError>,
) -> Option<WithdrawalStrategy> {
    let record = match value {
        Some(Value::Object(record)) => record,
        None => {
            errors.push(ValidationError::new("withdrawalStrategy", "is required"));
            return None;
        }
        Some(other) => {
            errors.push(ValidationError::new(
                "withdrawalStrategy",
                format!("must be an object, got {}", describe(other)),
            ));
            return None;
        }
    };

    let tag = required_string(record.get("strategy"), "withdrawalStrategy.strategy", errors)?;
    match StrategyKind::parse(&tag) {
        Some(strategy) => Some(WithdrawalStrategy { strategy }),
        None => {
            errors.push(ValidationError::new(
                "withdrawalStrategy.strategy",
                format!("unknown withdrawal strategy '{tag}'"),
            ));
            None
        }
    }
}

fn parse_goals(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Option<Vec<Goal>> {
    let entries = match value {
        None | Some(Value::Null) => return Some(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            errors.push(ValidationError::new(
                "goals",
                format!("must be an array, got {}", describe(other)),
            ));
            return None;
        }
    };

    let before = errors.len();
    let mut goals = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let path = format!("goals[{index}]");
        let Some(record) = entry.as_object() else {
            errors.push(ValidationError::new(
                &path,
                format!("must be an object, got {}", describe(entry)),
            ));
            continue;
        };
        let id = required_string(record.get("id"), &format!("{path}.id"), errors);
        let name = optional_string(record.get("name"), &format!("{path}.name"), errors);
        let target_amount = required_finite(record.get("targetAmount"), &format!("{path}.targetAmount"), errors);
        let target_month = required_index(record.get("targetMonth"), &format!("{path}.targetMonth"), errors);
        let priority = match record.get("priority") {
            None | Some(Value::Null) => Some(1),
            Some(value) => match required_index(Some(value), &format!("{path}.priority"), errors) {
                Some(0) => {
                    errors.push(ValidationError::new(
                        format!("{path}.priority"),
                        "must be at least 1",
                    ));
                    None
                }
                other => other,
            },
        };
        if let (Some(id), Some(target_amount), Some(target_month), Some(priority)) =
            (id, target_amount, target_month, priority)
        {
            goals.push(Goal {
                id,
                name,
                target_amount,
                target_month,
                priority,
            });
        }
    }
    (errors.len() == before).then_some(goals)
}

fn parse_accounts(
    value: Option<&Value>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<BTreeMap<AccountType, AccountBalance>> {
    let record = match value {
        Some(Value::Object(record)) => record,
        None => {
            errors.push(ValidationError::new(path, "is required"));
            return None;
        }
        Some(other) => {
            errors.push(ValidationError::new(
                path,
                format!(
                    "must be an object mapping account type to balance, got {}",
                    describe(other)
                ),
            ));
            return None;
        }
    };

    let before = errors.len();
    let mut accounts = BTreeMap::new();
    for (key, balance) in record {
        let account_path = format!("{path}.{key}");
        let Some(account) = AccountType::parse(key) else {
            errors.push(ValidationError::new(
                account_path,
                format!("unknown account type '{key}'"),
            ));
            continue;
        };
        if let Some(balance) = parse_balance(balance, &account_path, errors) {
            accounts.insert(account, balance);
        }
    }
    (errors.len() == before).then_some(accounts)
}

fn parse_balance(value: &Value, path: &str, errors: &mut Vec<ValidationError>) -> Option<AccountBalance> {
    let Value::Object(record) = value else {
        return required_finite(Some(value), path, errors).map(AccountBalance::Plain);
    };

    let before = errors.len();
    let total_value = required_finite(record.get("totalValue"), &format!("{path}.totalValue"), errors);
    let mut holdings = Vec::new();
    match record.get("holdings") {
        None | Some(Value::Null) => {}
        Some(Value::Array(entries)) => {
            for (index, entry) in entries.iter().enumerate() {
                let holding_path = format!("{path}.holdings[{index}]");
                let Some(holding) = entry.as_object() else {
                    errors.push(ValidationError::new(
                        &holding_path,
                        format!("must be an object, got {}", describe(entry)),
                    ));
                    continue;
                };
                let asset_class = required_string(
                    holding.get("assetClass"),
                    &format!("{holding_path}.assetClass"),
                    errors,
                );
                let value = required_finite(holding.get("value"), &format!("{holding_path}.value"), errors);
                let cost_basis =
                    optional_finite(holding.get("costBasis"), &format!("{holding_path}.costBasis"), errors);
                if let (Some(asset_class), Some(value)) = (asset_class, value) {
                    holdings.push(Holding {
                        asset_class,
                        value,
                        cost_basis,
                    });
                }
            }
        }
        Some(other) => {
            errors.push(ValidationError::new(
                format!("{path}.holdings"),
                format!("must be an array, got {}", describe(other)),
            ));
        }
    }

    if errors.len() > before {
        return None;
    }
    total_value.map(|total_value| {
        AccountBalance::Structured(StructuredBalance {
            total_value,
            holdings,
        })
    })
}

fn parse_snapshot(value: &Value, index: usize, errors: &mut Vec<ValidationError>) -> Option<MonthlySnapshot> {
    let path = format!("monthlyData[{index}]");
    let Some(record) = value.as_object() else {
        errors.push(ValidationError::new(
            path,
            format!("must be an object, got {}", describe(value)),
        ));
        return None;
    };

    let before = errors.len();
    let month_offset = match record.get("monthOffset") {
        None | Some(Value::Null) => Some(index as u32),
        Some(value) => {
            let offset = required_index(Some(value), &format!("{path}.monthOffset"), errors);
            if let Some(offset) = offset.filter(|offset| *offset as usize != index) {
                errors.push(ValidationError::new(
                    format!("{path}.monthOffset"),
                    format!("expected {index}, got {offset}"),
                ));
            }
            offset
        }
    };
    let net_worth = required_finite(record.get("netWorth"), &format!("{path}.netWorth"), errors);
    let accounts = parse_accounts(record.get("accounts"), &format!("{path}.accounts"), errors);

    let mut snapshot = MonthlySnapshot::default();
    for field in FlowField::ALL {
        let field_path = format!("{path}.{}", field.key());
        if let Some(value) = optional_finite(record.get(field.key()), &field_path, errors) {
            *field.slot(&mut snapshot) = value;
        }
    }

    if errors.len() > before {
        return None;
    }
    snapshot.month_offset = month_offset?;
    snapshot.net_worth = net_worth?;
    snapshot.accounts = accounts?;
    Some(snapshot)
}

fn parse_goal_outcomes(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Vec<GoalOutcome> {
    let entries = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            errors.push(ValidationError::new(
                "goalOutcomes",
                format!("must be an array, got {}", describe(other)),
            ));
            return Vec::new();
        }
    };

    let mut outcomes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let path = format!("goalOutcomes[{index}]");
        let Some(record) = entry.as_object() else {
            errors.push(ValidationError::new(
                &path,
                format!("must be an object, got {}", describe(entry)),
            ));
            continue;
        };
        let goal_id = required_string(record.get("goalId"), &format!("{path}.goalId"), errors);
        let achieved = match record.get("achieved") {
            Some(Value::Bool(flag)) => Some(*flag),
            other => {
                errors.push(ValidationError::new(
                    format!("{path}.achieved"),
                    format!("must be a boolean, got {}", describe_opt(other)),
                ));
                None
            }
        };
        let net_worth_at_target = optional_finite(
            record.get("netWorthAtTarget"),
            &format!("{path}.netWorthAtTarget"),
            errors,
        );
        let shortfall = optional_finite(record.get("shortfall"), &format!("{path}.shortfall"), errors);
        if let (Some(goal_id), Some(achieved)) = (goal_id, achieved) {
            outcomes.push(GoalOutcome {
                goal_id,
                achieved,
                net_worth_at_target,
                shortfall: shortfall.unwrap_or(0.0),
            });
        }
    }
    outcomes
}

fn required_finite(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) -> Option<f64> {
    match value {
        None => {
            errors.push(ValidationError::new(path, "is required"));
            None
        }
        Some(value) => finite(value, path, errors),
    }
}

fn optional_finite(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) -> Option<f64> {
    value.and_then(|value| finite(value, path, errors))
}

fn finite(value: &Value, path: &str, errors: &mut Vec<ValidationError>) -> Option<f64> {
    let message = match value {
        Value::Number(number) => match number.as_f64() {
            Some(n) if n.is_finite() => return Some(n),
            _ => format!("must be a finite number, got {number}"),
        },
        // Serialized NaN and Infinity arrive as null.
        Value::Null => "must be a finite number, got null (NaN or Infinity upstream?)".to_string(),
        Value::String(text) if matches!(text.as_str(), "NaN" | "Infinity" | "-Infinity") => {
            format!("must be a finite number, got {text}")
        }
        other => format!("must be a finite number, got {}", describe(other)),
    };
    errors.push(ValidationError::new(path, message));
    None
}

fn required_index(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) -> Option<u32> {
    let Some(value) = value else {
        errors.push(ValidationError::new(path, "is required"));
        return None;
    };
    let parsed = match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64)
                .map(|n| n as u64)
        }),
        _ => None,
    };
    match parsed.and_then(|n| u32::try_from(n).ok()) {
        Some(n) => Some(n),
        None => {
            errors.push(ValidationError::new(
                path,
                format!("must be a non-negative integer, got {}", render(value)),
            ));
            None
        }
    }
}

fn required_string(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) -> Option<String> {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
        Some(Value::String(_)) => {
            errors.push(ValidationError::new(path, "must be a non-empty string"));
            None
        }
        None => {
            errors.push(ValidationError::new(path, "is required"));
            None
        }
        Some(other) => {
            errors.push(ValidationError::new(
                path,
                format!("must be a string, got {}", describe(other)),
            ));
            None
        }
    }
}

fn optional_string(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => {
            errors.push(ValidationError::new(
                path,
                format!("must be a string, got {}", describe(other)),
            ));
            None
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn describe_opt(value: Option<&Value>) -> &'static str {
    value.map_or("nothing", describe)
}

fn render(value: &Value) -> String {
    match value {
        Value::Number(number) => number.to_string(),
        other => describe(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Frequency, StrategyKind};
    use serde_json::json;

    fn sample_input_json() -> Value {
        json!({
            "initialAccounts": {
                "cash": 10000,
                "taxable": {
                    "totalValue": 50000,
                    "holdings": [
                        {"assetClass": "stocks", "value": 40000, "costBasis": 30000},
                        {"assetClass": "bonds", "value": 10000}
                    ]
                },
                "tax_deferred": 120000,
                "roth": 15000
            },
            "events": [
                {"id": "salary", "type": "INCOME", "monthOffset": 0, "amount": 8000,
                 "metadata": {"name": "Salary", "taxable": true}},
                {"id": "rent", "type": "EXPENSE", "monthOffset": 0, "amount": 2500},
                {"id": "401k", "type": "CONTRIBUTION", "monthOffset": 0, "amount": 1500,
                 "metadata": {"targetAccountType": "tax_deferred", "frequency": "monthly"}},
                {"id": "car", "type": "ONE_TIME_EXPENSE", "monthOffset": 6, "amount": 20000}
            ],
            "config": {
                "expectedReturns": {"stocks": 0.07, "bonds": 0.03, "cash": 0.01},
                "volatilities": {"stocks": 0.15, "bonds": 0.05, "cash": 0.0}
            },
            "monthsToRun": 12,
            "withdrawalStrategy": {"strategy": "TAX_EFFICIENT"},
            "goals": [
                {"id": "emergency", "targetAmount": 20000, "targetMonth": 11, "priority": 2}
            ]
        })
    }

    fn paths(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.path.as_str()).collect()
    }

    fn sample_output_json(months: u32, net_worth: f64) -> Value {
        let monthly: Vec<Value> = (0..months)
            .map(|m| {
                json!({
                    "monthOffset": m,
                    "netWorth": net_worth + m as f64,
                    "accounts": {"cash": net_worth + m as f64},
                    "incomeThisMonth": 5000,
                    "expensesThisMonth": 0
                })
            })
            .collect();
        json!({
            "success": true,
            "monthlyData": monthly,
            "finalNetWorth": net_worth + (months - 1) as f64
        })
    }

    #[test]
    fn validate_input_accepts_well_formed_document() {
        let input = validate_input(&sample_input_json()).expect("valid input");

        assert_eq!(input.months_to_run, 12);
        assert_eq!(input.events.len(), 4);
        assert_eq!(input.withdrawal_strategy.strategy, StrategyKind::TaxEfficient);
        assert_eq!(input.goals.len(), 1);
        assert_eq!(input.goals[0].priority, 2);

        let taxable = &input.initial_accounts[&AccountType::Taxable];
        assert_eq!(taxable.total(), 50_000.0);
        match taxable {
            AccountBalance::Structured(structured) => {
                assert_eq!(structured.holdings.len(), 2);
                assert_eq!(structured.holdings[0].cost_basis, Some(30_000.0));
            }
            AccountBalance::Plain(_) => panic!("expected structured balance"),
        }

        match &input.events[2].details {
            EventDetails::Contribution(details) => {
                assert_eq!(details.target_account_type, Some(AccountType::TaxDeferred));
                assert_eq!(details.frequency, Frequency::Monthly);
            }
            other => panic!("unexpected details {other:?}"),
        }
        assert_eq!(input.events[3].event_type(), EventType::OneTimeExpense);
    }

    #[test]
    fn validate_input_rejects_missing_events_key() {
        let mut doc = sample_input_json();
        doc.as_object_mut().expect("object").remove("events");

        let errors = validate_input(&doc).expect_err("must reject missing events");
        assert_eq!(paths(&errors), vec!["events"]);
        assert_eq!(errors[0].message, "is required");
    }

    #[test]
    fn validate_input_collects_every_error_in_one_pass() {
        let doc = json!({
            "initialAccounts": {"cash": null, "brokerage": 10},
            "events": [
                {"id": "a", "type": "INCOME", "monthOffset": -1, "amount": "NaN"},
                {"type": "LOTTERY", "monthOffset": 0, "amount": 1}
            ],
            "config": {"expectedReturns": {"stocks": "Infinity"}},
            "monthsToRun": 0,
            "withdrawalStrategy": {"strategy": ""}
        });

        let errors = validate_input(&doc).expect_err("must reject");
        let paths = paths(&errors);
        for expected in [
            "initialAccounts.cash",
            "initialAccounts.brokerage",
            "events[0].monthOffset",
            "events[0].amount",
            "events[1].id",
            "events[1].type",
            "config.expectedReturns.stocks",
            "config.volatilities",
            "monthsToRun",
            "withdrawalStrategy.strategy",
        ] {
            assert!(paths.contains(&expected), "missing error for {expected}: {paths:?}");
        }
    }

    #[test]
    fn validate_input_never_coerces_non_finite_amounts() {
        for bad in [json!(null), json!("NaN"), json!("Infinity"), json!("-Infinity")] {
            let mut doc = sample_input_json();
            doc["events"][0]["amount"] = bad.clone();
            let errors = validate_input(&doc).expect_err("non-finite amount must fail");
            assert_eq!(paths(&errors), vec!["events[0].amount"], "for {bad}");
            assert!(errors[0].message.starts_with("must be a finite number"));
        }
    }

    #[test]
    fn validate_input_rejects_duplicate_event_ids() {
        let mut doc = sample_input_json();
        doc["events"][1]["id"] = json!("salary");

        let errors = validate_input(&doc).expect_err("duplicate ids must fail");
        assert_eq!(paths(&errors), vec!["events[1].id"]);
        assert!(errors[0].message.contains("duplicate event id 'salary'"));
    }

    #[test]
    fn validate_input_rejects_metadata_fields_foreign_to_event_type() {
        let mut doc = sample_input_json();
        doc["events"][1]["metadata"] = json!({"targetAccountType": "roth"});

        let errors = validate_input(&doc).expect_err("mismatched metadata must fail");
        assert_eq!(paths(&errors), vec!["events[1].metadata"]);
        assert!(errors[0].message.contains("targetAccountType"));
    }

    #[test]
    fn validate_input_rejects_end_before_start() {
        let mut doc = sample_input_json();
        doc["events"][0]["monthOffset"] = json!(5);
        doc["events"][0]["metadata"] = json!({"endMonthOffset": 2});

        let errors = validate_input(&doc).expect_err("end before start must fail");
        assert_eq!(paths(&errors), vec!["events[0].metadata.endMonthOffset"]);
    }

    #[test]
    fn validate_input_rejects_unknown_strategy() {
        let mut doc = sample_input_json();
        doc["withdrawalStrategy"] = json!({"strategy": "YOLO"});

        let errors = validate_input(&doc).expect_err("unknown strategy must fail");
        assert_eq!(paths(&errors), vec!["withdrawalStrategy.strategy"]);
    }

    #[test]
    fn validate_input_accepts_529_alias_keys() {
        let mut doc = sample_input_json();
        doc["initialAccounts"]["529"] = json!(5000);
        doc["initialAccounts"]["hsa"] = json!(2000);

        let input = validate_input(&doc).expect("valid input");
        assert_eq!(input.initial_accounts[&AccountType::FiveTwentyNine].total(), 5_000.0);
        assert_eq!(input.initial_accounts[&AccountType::Hsa].total(), 2_000.0);
    }

    #[test]
    fn validate_input_rejects_non_object_root() {
        let errors = validate_input(&json!([1, 2, 3])).expect_err("array root must fail");
        assert_eq!(paths(&errors), vec!["$"]);
    }

    #[test]
    fn validate_output_accepts_consistent_reply() {
        let output = validate_output(&sample_output_json(3, 1000.0), 3).expect("valid output");
        assert!(output.success);
        assert_eq!(output.monthly_data.len(), 3);
        assert_eq!(output.monthly_data[2].month_offset, 2);
        assert_eq!(output.monthly_data[1].income_this_month, 5000.0);
        assert_eq!(output.final_net_worth, Some(1002.0));
    }

    #[test]
    fn validate_output_reports_length_mismatch_instead_of_truncating() {
        let errors =
            validate_output(&sample_output_json(2, 1000.0), 3).expect_err("short reply must fail");
        assert_eq!(paths(&errors), vec!["monthlyData"]);
        assert!(errors[0].message.contains("expected 3 monthly entries, got 2"));
    }

    #[test]
    fn validate_output_checks_final_net_worth_tolerance() {
        let mut doc = sample_output_json(3, 1000.0);
        doc["finalNetWorth"] = json!(1002.5);
        assert!(validate_output(&doc, 3).is_ok());

        doc["finalNetWorth"] = json!(1004.0);
        let errors = validate_output(&doc, 3).expect_err("drifted final net worth must fail");
        assert_eq!(paths(&errors), vec!["finalNetWorth"]);
    }

    #[test]
    fn validate_output_flags_null_net_worth() {
        let mut doc = sample_output_json(3, 1000.0);
        doc["monthlyData"][1]["netWorth"] = Value::Null;

        let errors = validate_output(&doc, 3).expect_err("null net worth must fail");
        assert!(paths(&errors).contains(&"monthlyData[1].netWorth"));
    }

    #[test]
    fn validate_output_flags_misnumbered_months() {
        let mut doc = sample_output_json(3, 1000.0);
        doc["monthlyData"][2]["monthOffset"] = json!(7);

        let errors = validate_output(&doc, 3).expect_err("misnumbered month must fail");
        assert_eq!(paths(&errors), vec!["monthlyData[2].monthOffset"]);
    }

    #[test]
    fn validate_output_accepts_rejection_without_data() {
        let doc = json!({"success": false, "error": "assets exhausted in month 14"});
        let output = validate_output(&doc, 24).expect("rejection is a valid reply");
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("assets exhausted in month 14"));
        assert!(output.monthly_data.is_empty());
        assert_eq!(output.final_net_worth, None);
    }

    #[test]
    fn validate_output_reports_malformed_data_on_rejection() {
        let doc = json!({
            "success": false,
            "monthlyData": [{"netWorth": "NaN", "accounts": {}}]
        });
        let errors = validate_output(&doc, 24).expect_err("malformed rejection must fail");
        assert_eq!(paths(&errors), vec!["monthlyData[0].netWorth"]);
    }

    #[test]
    fn validate_output_requires_success_flag() {
        let errors = validate_output(&json!({"monthlyData": []}), 1).expect_err("must fail");
        assert_eq!(paths(&errors), vec!["success"]);
    }

    #[test]
    fn flow_integrity_flags_zero_where_event_is_active() {
        let input = validate_input(&json!({
            "initialAccounts": {"cash": 0},
            "events": [
                {"id": "pay", "type": "INCOME", "monthOffset": 1, "amount": 5000}
            ],
            "config": {"expectedReturns": {}, "volatilities": {}},
            "monthsToRun": 3,
            "withdrawalStrategy": {"strategy": "CASH_FIRST"}
        }))
        .expect("valid input");

        let mut doc = sample_output_json(3, 1000.0);
        doc["monthlyData"][0]["incomeThisMonth"] = json!(0);
        doc["monthlyData"][2]["incomeThisMonth"] = json!(0);
        let output = validate_output(&doc, 3).expect("structurally valid");

        let errors = check_flow_integrity(&input, &output);
        assert_eq!(paths(&errors), vec!["monthlyData[2].incomeThisMonth"]);
        assert!(errors[0].message.contains("'pay'"));
    }

    #[test]
    fn flow_integrity_nets_offsetting_income() {
        let input = validate_input(&json!({
            "initialAccounts": {"cash": 10000},
            "events": [
                {"id": "pay", "type": "INCOME", "monthOffset": 0, "amount": 5000},
                {"id": "clawback", "type": "INCOME", "monthOffset": 0, "amount": -5000},
                {"id": "rent", "type": "EXPENSE", "monthOffset": 0, "amount": 1000}
            ],
            "config": {"expectedReturns": {}, "volatilities": {}},
            "monthsToRun": 2,
            "withdrawalStrategy": {"strategy": "CASH_FIRST"}
        }))
        .expect("valid input");

        let mut doc = sample_output_json(2, 1000.0);
        for month in 0..2 {
            doc["monthlyData"][month]["incomeThisMonth"] = json!(0);
            doc["monthlyData"][month]["expensesThisMonth"] = json!(1000);
        }
        let output = validate_output(&doc, 2).expect("structurally valid");
        assert!(check_flow_integrity(&input, &output).is_empty());

        doc["monthlyData"][1]["expensesThisMonth"] = json!(0);
        let output = validate_output(&doc, 2).expect("structurally valid");
        let errors = check_flow_integrity(&input, &output);
        assert_eq!(paths(&errors), vec!["monthlyData[1].expensesThisMonth"]);
        assert!(errors[0].message.contains("'rent'"));
    }

    #[test]
    fn flow_integrity_still_flags_partial_income_offsets() {
        let input = validate_input(&json!({
            "initialAccounts": {"cash": 10000},
            "events": [
                {"id": "pay", "type": "INCOME", "monthOffset": 0, "amount": 5000},
                {"id": "clawback", "type": "INCOME", "monthOffset": 0, "amount": -2000}
            ],
            "config": {"expectedReturns": {}, "volatilities": {}},
            "monthsToRun": 1,
            "withdrawalStrategy": {"strategy": "CASH_FIRST"}
        }))
        .expect("valid input");

        let mut doc = sample_output_json(1, 1000.0);
        doc["monthlyData"][0]["incomeThisMonth"] = json!(0);
        let output = validate_output(&doc, 1).expect("structurally valid");
        let errors = check_flow_integrity(&input, &output);
        assert_eq!(paths(&errors), vec!["monthlyData[0].incomeThisMonth"]);
        assert!(errors[0].message.contains("'pay'"));
        assert!(errors[0].message.contains("'clawback'"));
    }

    #[test]
    fn validation_error_displays_path_and_message() {
        let err = ValidationError::new("events[0].amount", "is required");
        assert_eq!(err.to_string(), "events[0].amount: is required");
    }
}
