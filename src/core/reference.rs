use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;
use tracing::debug;

use super::engine::{EngineFailure, SimulationEngine};
use super::types::{
    AccountBalance, AccountType, EventDetails, FinancialEvent, GoalOutcome, Holding,
    MonthlySnapshot, SimulationInput, SimulationOutput, StrategyKind, StructuredBalance,
};

const BALANCE_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEngine;

impl SimulationEngine for ReferenceEngine {
    fn run(
        &self,
        input: &SimulationInput,
    ) -> impl Future<Output = Result<Value, EngineFailure>> + Send {
        let output = simulate(input);
        async move {
            serde_json::to_value(&output)
                .map_err(|e| EngineFailure::Crashed(format!("could not encode output: {e}")))
        }
    }
}

#[derive(Debug, Clone)]
struct Position {
    uninvested: f64,
    holdings: Vec<Holding>,
    structured: bool,
}

impl Position {
    fn empty() -> Self {
        Self {
            uninvested: 0.0,
            holdings: Vec::new(),
            structured: false,
        }
    }

    fn from_balance(balance: &AccountBalance) -> Self {
        match balance {
            AccountBalance::Plain(value) => Self {
                uninvested: *value,
                holdings: Vec::new(),
                structured: false,
            },
            AccountBalance::Structured(structured) => {
                let held: f64 = structured.holdings.iter().map(|h| h.value).sum();
                Self {
                    uninvested: structured.total_value - held,
                    holdings: structured.holdings.clone(),
                    structured: true,
                }
            }
        }
    }

    fn holdings_total(&self) -> f64 {
        self.holdings.iter().map(|h| h.value).sum()
    }

    fn total(&self) -> f64 {
        self.uninvested + self.holdings_total()
    }

    fn grow(&mut self, account: AccountType, expected_returns: &BTreeMap<String, f64>) {
        let account_rate = expected_returns.get(account.key()).copied().unwrap_or(0.0);
        self.uninvested *= 1.0 + monthly_rate(account_rate);
        for holding in &mut self.holdings {
            let rate = expected_returns
                .get(&holding.asset_class)
                .copied()
                .unwrap_or(account_rate);
            holding.value *= 1.0 + monthly_rate(rate);
        }
    }

    fn deposit(&mut self, amount: f64) {
        let held = self.holdings_total();
        if held <= BALANCE_EPS {
            self.uninvested += amount;
            return;
        }
        for holding in &mut self.holdings {
            let share = amount * holding.value / held;
            holding.value += share;
            if let Some(basis) = holding.cost_basis.as_mut() {
                *basis += share;
            }
        }
    }

    fn withdraw(&mut self, amount: f64) -> f64 {
        let taken = amount.min(self.total().max(0.0));
        let from_uninvested = taken.min(self.uninvested.max(0.0));
        self.uninvested -= from_uninvested;

        let rest = taken - from_uninvested;
        let held = self.holdings_total();
        if rest > 0.0 && held > BALANCE_EPS {
            let keep = (1.0 - rest / held).max(0.0);
            for holding in &mut self.holdings {
                holding.value *= keep;
                if let Some(basis) = holding.cost_basis.as_mut() {
                    *basis *= keep;
                }
            }
        }
        taken
    }

    fn to_balance(&self) -> AccountBalance {
        if self.structured {
            AccountBalance::Structured(StructuredBalance {
                total_value: self.total(),
                holdings: self.holdings.clone(),
            })
        } else {
            AccountBalance::Plain(self.uninvested)
        }
    }
}

struct Ledger {
    positions: BTreeMap<AccountType, Position>,
}

impl Ledger {
    fn new(initial: &BTreeMap<AccountType, AccountBalance>) -> Self {
        let mut positions: BTreeMap<AccountType, Position> = initial
            .iter()
            .map(|(account, balance)| (*account, Position::from_balance(balance)))
            .collect();
        positions.entry(AccountType::Cash).or_insert_with(Position::empty);
        Self { positions }
    }

    fn position(&mut self, account: AccountType) -> &mut Position {
        self.positions.entry(account).or_insert_with(Position::empty)
    }

    fn balance(&self, account: AccountType) -> f64 {
        self.positions.get(&account).map_or(0.0, Position::total)
    }

    fn cash(&mut self) -> &mut f64 {
        &mut self.position(AccountType::Cash).uninvested
    }

    fn net_worth(&self) -> f64 {
        self.positions.values().map(Position::total).sum()
    }

    fn grow(&mut self, expected_returns: &BTreeMap<String, f64>) {
        for (account, position) in &mut self.positions {
            position.grow(*account, expected_returns);
        }
    }

    fn transfer(&mut self, from: AccountType, to: AccountType, amount: f64) -> f64 {
        let taken = self.position(from).withdraw(amount);
        self.position(to).deposit(taken);
        taken
    }

    fn snapshot_accounts(&self) -> BTreeMap<AccountType, AccountBalance> {
        self.positions
            .iter()
            .map(|(account, position)| (*account, position.to_balance()))
            .collect()
    }

    // Covers negative cash from the other accounts; returns the amount drawn
    // and how much of it came out of tax-deferred money.
    fn cover_shortfall(&mut self, strategy: StrategyKind) -> (f64, f64) {
        let needed = -self.balance(AccountType::Cash);
        if needed <= BALANCE_EPS {
            return (0.0, 0.0);
        }

        let order = strategy.drawdown_order();
        let mut draws = Vec::with_capacity(order.len());
        if strategy == StrategyKind::ProRata {
            let available: f64 = order.iter().map(|a| self.balance(*a).max(0.0)).sum();
            if available > BALANCE_EPS {
                let ratio = (needed / available).min(1.0);
                for account in order {
                    let share = self.balance(account).max(0.0) * ratio;
                    if share > 0.0 {
                        draws.push((account, self.position(account).withdraw(share)));
                    }
                }
            }
        } else {
            let mut remaining = needed;
            for account in order {
                if remaining <= BALANCE_EPS {
                    break;
                }
                if self.balance(account) <= 0.0 {
                    continue;
                }
                let taken = self.position(account).withdraw(remaining);
                remaining -= taken;
                draws.push((account, taken));
            }
        }

        let drawn: f64 = draws.iter().map(|(_, taken)| taken).sum();
        let tax_deferred: f64 = draws
            .iter()
            .filter(|(account, _)| *account == AccountType::TaxDeferred)
            .map(|(_, taken)| taken)
            .sum();
        *self.cash() += drawn;
        (drawn, tax_deferred)
    }
}

pub fn simulate(input: &SimulationInput) -> SimulationOutput {
    let mut ledger = Ledger::new(&input.initial_accounts);
    let mut ordered: Vec<&FinancialEvent> = input.events.iter().collect();
    ordered.sort_by(|a, b| {
        a.month_offset
            .cmp(&b.month_offset)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut monthly_data = Vec::with_capacity(input.months_to_run as usize);
    let mut ordinary_income_ytd = 0.0;

    for month in 0..input.months_to_run {
        if month % 12 == 0 {
            ordinary_income_ytd = 0.0;
        }
        ledger.grow(&input.config.expected_returns);

        let mut snapshot = MonthlySnapshot {
            month_offset: month,
            ..MonthlySnapshot::default()
        };
        for event in ordered.iter().filter(|e| e.is_active(month)) {
            if let Err(reason) = apply_event(event, month, &mut ledger, &mut snapshot) {
                return rejected(reason, monthly_data);
            }
        }
        ordinary_income_ytd += snapshot.ordinary_income_for_tax_ytd;

        let (drawn, from_tax_deferred) = ledger.cover_shortfall(input.withdrawal_strategy.strategy);
        snapshot.withdrawals_this_month += drawn;
        ordinary_income_ytd += from_tax_deferred;
        let cash = ledger.balance(AccountType::Cash);
        if cash < -BALANCE_EPS {
            return rejected(
                format!(
                    "assets exhausted in month {month}: shortfall of {:.2}",
                    -cash
                ),
                monthly_data,
            );
        }

        snapshot.ordinary_income_for_tax_ytd = ordinary_income_ytd;
        snapshot.net_worth = ledger.net_worth();
        snapshot.accounts = ledger.snapshot_accounts();
        monthly_data.push(snapshot);
    }

    let final_net_worth = monthly_data.last().map(|m| m.net_worth);
    let (goal_outcomes, success_probability) = score_goals(input, &monthly_data);
    debug!(
        months = monthly_data.len(),
        final_net_worth = final_net_worth.unwrap_or_default(),
        "reference simulation finished"
    );

    SimulationOutput {
        success: true,
        error: None,
        monthly_data,
        final_net_worth,
        goal_outcomes,
        success_probability,
    }
}

fn apply_event(
    event: &FinancialEvent,
    month: u32,
    ledger: &mut Ledger,
    snapshot: &mut MonthlySnapshot,
) -> Result<(), String> {
    let magnitude = event.amount.abs();
    match &event.details {
        EventDetails::Income(_)
        | EventDetails::AnnuityPayment(_)
        | EventDetails::SocialSecurityIncome(_)
        | EventDetails::DisabilityInsurancePayout(_) => {
            *ledger.cash() += event.amount;
            snapshot.income_this_month += event.amount;
            if event.details.is_taxable_income() {
                snapshot.ordinary_income_for_tax_ytd += event.amount;
            }
        }
        EventDetails::Expense(_) | EventDetails::HealthcareCost(_) => {
            *ledger.cash() -= magnitude;
            snapshot.expenses_this_month += magnitude;
        }
        EventDetails::OneTimeExpense(_) => {
            *ledger.cash() -= magnitude;
            snapshot.one_time_events_impact_this_month += magnitude;
        }
        EventDetails::Contribution(d) => {
            let target = d.target_account_type.unwrap_or(AccountType::TaxDeferred);
            *ledger.cash() -= magnitude;
            ledger.position(target).deposit(magnitude);
            snapshot.contributions_to_investments_this_month += magnitude;
        }
        EventDetails::MegaBackdoorRoth(d) => {
            let target = if d.in_plan_conversion.unwrap_or(true) {
                AccountType::Roth
            } else {
                AccountType::TaxDeferred
            };
            *ledger.cash() -= magnitude;
            ledger.position(target).deposit(magnitude);
            snapshot.contributions_to_investments_this_month += magnitude;
        }
        EventDetails::Withdrawal(d) => {
            let source = d.source_account_type.unwrap_or(AccountType::TaxDeferred);
            require_balance(ledger, source, magnitude, event, month)?;
            let taken = ledger.transfer(source, AccountType::Cash, magnitude);
            snapshot.withdrawals_this_month += taken;
            if source == AccountType::TaxDeferred {
                snapshot.ordinary_income_for_tax_ytd += taken;
            }
        }
        EventDetails::RothConversion(d) => {
            let source = d.source_account_type.unwrap_or(AccountType::TaxDeferred);
            require_balance(ledger, source, magnitude, event, month)?;
            let converted = ledger.transfer(source, AccountType::Roth, magnitude);
            snapshot.roth_conversion_amount_this_month += converted;
            snapshot.ordinary_income_for_tax_ytd += converted;
        }
    }
    Ok(())
}

fn require_balance(
    ledger: &Ledger,
    source: AccountType,
    amount: f64,
    event: &FinancialEvent,
    month: u32,
) -> Result<(), String> {
    let available = ledger.balance(source);
    if available + BALANCE_EPS < amount {
        return Err(format!(
            "insufficient {} balance for event '{}' in month {month}: need {amount:.2}, have {available:.2}",
            source.key(),
            event.id
        ));
    }
    Ok(())
}

fn rejected(reason: String, monthly_data: Vec<MonthlySnapshot>) -> SimulationOutput {
    debug!(%reason, months = monthly_data.len(), "reference simulation rejected plan");
    SimulationOutput {
        success: false,
        error: Some(reason),
        final_net_worth: monthly_data.last().map(|m| m.net_worth),
        monthly_data,
        goal_outcomes: Vec::new(),
        success_probability: None,
    }
}

fn score_goals(
    input: &SimulationInput,
    monthly_data: &[MonthlySnapshot],
) -> (Vec<GoalOutcome>, Option<f64>) {
    if input.goals.is_empty() {
        return (Vec::new(), None);
    }

    let mut weight_total = 0.0;
    let mut weight_achieved = 0.0;
    let outcomes: Vec<GoalOutcome> = input
        .goals
        .iter()
        .map(|goal| {
            let net_worth = monthly_data
                .get(goal.target_month as usize)
                .map(|m| m.net_worth);
            let achieved = net_worth.is_some_and(|nw| nw >= goal.target_amount);
            let weight = goal.priority as f64;
            weight_total += weight;
            if achieved {
                weight_achieved += weight;
            }
            GoalOutcome {
                goal_id: goal.id.clone(),
                achieved,
                net_worth_at_target: net_worth,
                shortfall: (goal.target_amount - net_worth.unwrap_or(0.0)).max(0.0),
            }
        })
        .collect();
    (outcomes, Some(weight_achieved / weight_total))
}

fn monthly_rate(annual: f64) -> f64 {
    if annual <= -1.0 {
        return -1.0;
    }
    (1.0 + annual).powf(1.0 / 12.0) - 1.0
}
