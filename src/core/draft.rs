use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::calendar::{CalendarError, PlanCalendar, YearMonth};
use super::format::{format_number_with_commas, parse_formatted_number};
use super::types::{AccountType, EventType, FinancialEvent, Frequency};
use super::validation::{ValidationError, parse_event};

pub const DATE_FIELDS: [&str; 2] = ["monthOffset", "endMonthOffset"];

pub const MEGA_BACKDOOR_DEFAULT_LIMIT: f64 = 46_000.0;

const RECORD_FIELDS: [&str; 3] = ["id", "monthOffset", "amount"];
const AMOUNT_FIELDS: [&str; 2] = ["amount", "annualLimit"];
const DRAFT_PATH: &str = "draft";

pub fn contribution_limit(account: AccountType) -> Option<f64> {
    match account {
        AccountType::TaxDeferred => Some(23_000.0),
        AccountType::Roth => Some(7_000.0),
        AccountType::Hsa => Some(4_150.0),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl EventDraft {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            fields: Map::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|value| !value.is_null())
    }

    fn amount(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => parse_formatted_number(text),
            _ => None,
        }
    }

    fn frequency(&self) -> Frequency {
        self.get("frequency")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(if self.event_type == EventType::OneTimeExpense {
                Frequency::Once
            } else {
                Frequency::Monthly
            })
    }

    fn account(&self, field: &str) -> Option<AccountType> {
        self.get(field)?.as_str().and_then(AccountType::parse)
    }

    // The wire event record this draft describes. Formatted amounts such as
    // `"46,000"` become numbers; anything unparsable is passed through as-is
    // for the validator to report.
    fn to_record(&self) -> Value {
        let mut record = Map::new();
        let mut metadata = Map::new();
        record.insert("type".into(), Value::from(self.event_type.tag()));
        for (field, value) in &self.fields {
            if value.is_null() {
                continue;
            }
            let value = match (value, AMOUNT_FIELDS.contains(&field.as_str())) {
                (Value::String(text), true) => parse_formatted_number(text)
                    .map_or_else(|| value.clone(), Value::from),
                _ => value.clone(),
            };
            if RECORD_FIELDS.contains(&field.as_str()) {
                record.insert(field.clone(), value);
            } else {
                metadata.insert(field.clone(), value);
            }
        }
        record.insert("metadata".into(), Value::Object(metadata));
        Value::Object(record)
    }
}

fn defaults_for(event_type: EventType) -> Vec<(&'static str, Value)> {
    let frequency = if event_type == EventType::OneTimeExpense {
        "once"
    } else {
        "monthly"
    };
    let mut defaults = vec![("monthOffset", json!(0)), ("frequency", json!(frequency))];
    match event_type {
        EventType::Contribution => defaults.push(("targetAccountType", json!("tax_deferred"))),
        EventType::MegaBackdoorRoth => {
            defaults.push(("annualLimit", json!(MEGA_BACKDOOR_DEFAULT_LIMIT)));
            defaults.push(("inPlanConversion", json!(true)));
        }
        EventType::RothConversion | EventType::Withdrawal => {
            defaults.push(("sourceAccountType", json!("tax_deferred")));
        }
        EventType::Income | EventType::AnnuityPayment => defaults.push(("taxable", json!(true))),
        EventType::DisabilityInsurancePayout => {
            defaults.push(("taxable", json!(false)));
            defaults.push(("benefitPeriodMonths", json!(24)));
        }
        _ => {}
    }
    defaults
}

pub fn apply_defaults(draft: &EventDraft) -> EventDraft {
    let mut next = draft.clone();
    for (field, value) in defaults_for(draft.event_type) {
        if next.get(field).is_none() {
            next.fields.insert(field.to_string(), value);
        }
    }
    next
}

pub fn set_date(
    draft: &EventDraft,
    field: &str,
    year: i32,
    month: u32,
    calendar: &PlanCalendar,
) -> Result<EventDraft, CalendarError> {
    let offset = calendar.month_offset(year, month)?;
    Ok(draft.clone().with(field, offset))
}

pub fn display_date(draft: &EventDraft, field: &str, calendar: &PlanCalendar) -> Option<YearMonth> {
    let offset = u32::try_from(draft.get(field)?.as_u64()?).ok()?;
    Some(calendar.year_month(offset))
}

pub fn display_dates(draft: &EventDraft, calendar: &PlanCalendar) -> BTreeMap<String, YearMonth> {
    DATE_FIELDS
        .iter()
        .filter_map(|field| Some((field.to_string(), display_date(draft, field, calendar)?)))
        .collect()
}

pub fn display_ages(draft: &EventDraft, calendar: &PlanCalendar) -> BTreeMap<String, u32> {
    DATE_FIELDS
        .iter()
        .filter_map(|field| {
            let offset = u32::try_from(draft.get(field)?.as_u64()?).ok()?;
            Some((field.to_string(), calendar.age_at(offset)))
        })
        .collect()
}

/// A Social Security draft with a `claimingAge` but no start date starts in
/// the month that age is reached. Must run before `apply_defaults`, which
/// would otherwise pin the start to month zero.
pub fn resolve_claiming_age(draft: &EventDraft, calendar: &PlanCalendar) -> EventDraft {
    if draft.event_type != EventType::SocialSecurityIncome || draft.get("monthOffset").is_some() {
        return draft.clone();
    }
    let claiming_age = draft
        .get("claimingAge")
        .and_then(Value::as_u64)
        .and_then(|age| u32::try_from(age).ok());
    match claiming_age {
        Some(age) => draft.clone().with("monthOffset", calendar.offset_for_age(age)),
        None => draft.clone(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annual_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annual_amount_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_benefit: Option<f64>,
}

pub fn summarize(draft: &EventDraft) -> DraftSummary {
    let draft = apply_defaults(draft);
    let Some(amount) = draft.amount("amount") else {
        return DraftSummary::default();
    };
    let frequency = draft.frequency();
    let annual = amount * frequency.occurrences_per_year();

    let limit = match draft.event_type {
        EventType::Contribution => draft.account("targetAccountType").and_then(|account| {
            contribution_limit(account).map(|limit| (limit, format!("{} limit", account.key())))
        }),
        EventType::MegaBackdoorRoth => draft
            .amount("annualLimit")
            .map(|limit| (limit, "mega backdoor Roth limit".to_string())),
        _ => None,
    };
    let limit_warning = limit.filter(|(limit, _)| annual > *limit).map(|(limit, label)| {
        format!(
            "annual amount of ${} exceeds the {label} of ${}",
            format_number_with_commas(annual),
            format_number_with_commas(limit)
        )
    });

    let total_benefit = match draft.event_type {
        EventType::DisabilityInsurancePayout => draft
            .get("benefitPeriodMonths")
            .and_then(Value::as_u64)
            .map(|months| {
                let payments = match frequency.period_months() {
                    Some(period) => months.div_ceil(u64::from(period)),
                    None => 1,
                };
                amount * payments as f64
            }),
        _ => None,
    };

    DraftSummary {
        annual_amount: Some(annual),
        annual_amount_display: Some(format_number_with_commas(annual)),
        limit_warning,
        total_benefit,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize)]
#[error("draft has {} invalid field(s)", .0.len())]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    fn from_validation(errors: &[ValidationError]) -> Self {
        let mut fields = BTreeMap::new();
        for error in errors {
            let path = error.path.as_str();
            let relative = path
                .strip_prefix(DRAFT_PATH)
                .map(|rest| rest.trim_start_matches('.'))
                .unwrap_or(path);
            let field = relative.strip_prefix("metadata.").unwrap_or(relative);
            let field = if field.is_empty() { DRAFT_PATH } else { field };
            fields
                .entry(field.to_string())
                .or_insert_with(|| error.message.clone());
        }
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

pub fn build_event(draft: &EventDraft) -> Result<FinancialEvent, FieldErrors> {
    let mut errors = Vec::new();
    match parse_event(&draft.to_record(), DRAFT_PATH, &mut errors) {
        Some(event) if errors.is_empty() => Ok(event),
        _ => Err(FieldErrors::from_validation(&errors)),
    }
}
