use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Cash,
    Taxable,
    TaxDeferred,
    Roth,
    Hsa,
    #[serde(rename = "529", alias = "five_two_nine")]
    FiveTwentyNine,
}

impl AccountType {
    pub const ALL: [AccountType; 6] = [
        AccountType::Cash,
        AccountType::Taxable,
        AccountType::TaxDeferred,
        AccountType::Roth,
        AccountType::Hsa,
        AccountType::FiveTwentyNine,
    ];

    pub fn key(self) -> &'static str {
        match self {
            AccountType::Cash => "cash",
            AccountType::Taxable => "taxable",
            AccountType::TaxDeferred => "tax_deferred",
            AccountType::Roth => "roth",
            AccountType::Hsa => "hsa",
            AccountType::FiveTwentyNine => "529",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "five_two_nine" => Some(AccountType::FiveTwentyNine),
            other => Self::ALL.into_iter().find(|account| account.key() == other),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Monthly,
    Quarterly,
    Annually,
    Once,
}

impl Frequency {
    pub fn period_months(self) -> Option<u32> {
        match self {
            Frequency::Monthly => Some(1),
            Frequency::Quarterly => Some(3),
            Frequency::Annually => Some(12),
            Frequency::Once => None,
        }
    }

    pub fn occurrences_per_year(self) -> f64 {
        match self.period_months() {
            Some(period) => 12.0 / period as f64,
            None => 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Income,
    Expense,
    OneTimeExpense,
    Contribution,
    Withdrawal,
    RothConversion,
    MegaBackdoorRoth,
    AnnuityPayment,
    SocialSecurityIncome,
    HealthcareCost,
    DisabilityInsurancePayout,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::Income,
        EventType::Expense,
        EventType::OneTimeExpense,
        EventType::Contribution,
        EventType::Withdrawal,
        EventType::RothConversion,
        EventType::MegaBackdoorRoth,
        EventType::AnnuityPayment,
        EventType::SocialSecurityIncome,
        EventType::HealthcareCost,
        EventType::DisabilityInsurancePayout,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            EventType::Income => "INCOME",
            EventType::Expense => "EXPENSE",
            EventType::OneTimeExpense => "ONE_TIME_EXPENSE",
            EventType::Contribution => "CONTRIBUTION",
            EventType::Withdrawal => "WITHDRAWAL",
            EventType::RothConversion => "ROTH_CONVERSION",
            EventType::MegaBackdoorRoth => "MEGA_BACKDOOR_ROTH",
            EventType::AnnuityPayment => "ANNUITY_PAYMENT",
            EventType::SocialSecurityIncome => "SOCIAL_SECURITY_INCOME",
            EventType::HealthcareCost => "HEALTHCARE_COST",
            EventType::DisabilityInsurancePayout => "DISABILITY_INSURANCE_PAYOUT",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn flow_field(self) -> FlowField {
        match self {
            EventType::Income
            | EventType::AnnuityPayment
            | EventType::SocialSecurityIncome
            | EventType::DisabilityInsurancePayout => FlowField::Income,
            EventType::Expense | EventType::HealthcareCost => FlowField::Expenses,
            EventType::OneTimeExpense => FlowField::OneTimeImpact,
            EventType::Contribution | EventType::MegaBackdoorRoth => FlowField::Contributions,
            EventType::Withdrawal => FlowField::Withdrawals,
            EventType::RothConversion => FlowField::RothConversion,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlowField {
    Income,
    Expenses,
    Contributions,
    OneTimeImpact,
    RothConversion,
    Withdrawals,
    OrdinaryIncomeYtd,
}

impl FlowField {
    pub const ALL: [FlowField; 7] = [
        FlowField::Income,
        FlowField::Expenses,
        FlowField::Contributions,
        FlowField::OneTimeImpact,
        FlowField::RothConversion,
        FlowField::Withdrawals,
        FlowField::OrdinaryIncomeYtd,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FlowField::Income => "incomeThisMonth",
            FlowField::Expenses => "expensesThisMonth",
            FlowField::Contributions => "contributionsToInvestmentsThisMonth",
            FlowField::OneTimeImpact => "oneTimeEventsImpactThisMonth",
            FlowField::RothConversion => "rothConversionAmountThisMonth",
            FlowField::Withdrawals => "withdrawalsThisMonth",
            FlowField::OrdinaryIncomeYtd => "ordinaryIncomeForTaxYTD",
        }
    }

    pub fn value(self, snapshot: &MonthlySnapshot) -> f64 {
        match self {
            FlowField::Income => snapshot.income_this_month,
            FlowField::Expenses => snapshot.expenses_this_month,
            FlowField::Contributions => snapshot.contributions_to_investments_this_month,
            FlowField::OneTimeImpact => snapshot.one_time_events_impact_this_month,
            FlowField::RothConversion => snapshot.roth_conversion_amount_this_month,
            FlowField::Withdrawals => snapshot.withdrawals_this_month,
            FlowField::OrdinaryIncomeYtd => snapshot.ordinary_income_for_tax_ytd,
        }
    }

    pub fn slot(self, snapshot: &mut MonthlySnapshot) -> &mut f64 {
        match self {
            FlowField::Income => &mut snapshot.income_this_month,
            FlowField::Expenses => &mut snapshot.expenses_this_month,
            FlowField::Contributions => &mut snapshot.contributions_to_investments_this_month,
            FlowField::OneTimeImpact => &mut snapshot.one_time_events_impact_this_month,
            FlowField::RothConversion => &mut snapshot.roth_conversion_amount_this_month,
            FlowField::Withdrawals => &mut snapshot.withdrawals_this_month,
            FlowField::OrdinaryIncomeYtd => &mut snapshot.ordinary_income_for_tax_ytd,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct IncomeDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxable: Option<bool>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ExpenseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct OneTimeExpenseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ContributionDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_account_type: Option<AccountType>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct TransferDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_account_type: Option<AccountType>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct MegaBackdoorRothDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annual_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_plan_conversion: Option<bool>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SocialSecurityDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claiming_age: Option<u32>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct HealthcareDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_type: Option<String>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct DisabilityPayoutDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benefit_period_months: Option<u32>,
    pub frequency: Frequency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_month_offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "metadata", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventDetails {
    Income(IncomeDetails),
    Expense(ExpenseDetails),
    OneTimeExpense(OneTimeExpenseDetails),
    Contribution(ContributionDetails),
    Withdrawal(TransferDetails),
    RothConversion(TransferDetails),
    MegaBackdoorRoth(MegaBackdoorRothDetails),
    AnnuityPayment(IncomeDetails),
    SocialSecurityIncome(SocialSecurityDetails),
    HealthcareCost(HealthcareDetails),
    DisabilityInsurancePayout(DisabilityPayoutDetails),
}

impl EventDetails {
    pub fn from_metadata(
        event_type: EventType,
        metadata: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        use serde_json::from_value;

        Ok(match event_type {
            EventType::Income => EventDetails::Income(from_value(metadata)?),
            EventType::Expense => EventDetails::Expense(from_value(metadata)?),
            EventType::OneTimeExpense => EventDetails::OneTimeExpense(from_value(metadata)?),
            EventType::Contribution => EventDetails::Contribution(from_value(metadata)?),
            EventType::Withdrawal => EventDetails::Withdrawal(from_value(metadata)?),
            EventType::RothConversion => EventDetails::RothConversion(from_value(metadata)?),
            EventType::MegaBackdoorRoth => EventDetails::MegaBackdoorRoth(from_value(metadata)?),
            EventType::AnnuityPayment => EventDetails::AnnuityPayment(from_value(metadata)?),
            EventType::SocialSecurityIncome => {
                EventDetails::SocialSecurityIncome(from_value(metadata)?)
            }
            EventType::HealthcareCost => EventDetails::HealthcareCost(from_value(metadata)?),
            EventType::DisabilityInsurancePayout => {
                EventDetails::DisabilityInsurancePayout(from_value(metadata)?)
            }
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            EventDetails::Income(_) => EventType::Income,
            EventDetails::Expense(_) => EventType::Expense,
            EventDetails::OneTimeExpense(_) => EventType::OneTimeExpense,
            EventDetails::Contribution(_) => EventType::Contribution,
            EventDetails::Withdrawal(_) => EventType::Withdrawal,
            EventDetails::RothConversion(_) => EventType::RothConversion,
            EventDetails::MegaBackdoorRoth(_) => EventType::MegaBackdoorRoth,
            EventDetails::AnnuityPayment(_) => EventType::AnnuityPayment,
            EventDetails::SocialSecurityIncome(_) => EventType::SocialSecurityIncome,
            EventDetails::HealthcareCost(_) => EventType::HealthcareCost,
            EventDetails::DisabilityInsurancePayout(_) => EventType::DisabilityInsurancePayout,
        }
    }

    pub fn frequency(&self) -> Frequency {
        match self {
            EventDetails::Income(d) | EventDetails::AnnuityPayment(d) => d.frequency,
            EventDetails::Expense(d) => d.frequency,
            EventDetails::OneTimeExpense(_) => Frequency::Once,
            EventDetails::Contribution(d) => d.frequency,
            EventDetails::Withdrawal(d) | EventDetails::RothConversion(d) => d.frequency,
            EventDetails::MegaBackdoorRoth(d) => d.frequency,
            EventDetails::SocialSecurityIncome(d) => d.frequency,
            EventDetails::HealthcareCost(d) => d.frequency,
            EventDetails::DisabilityInsurancePayout(d) => d.frequency,
        }
    }

    pub fn end_month_offset(&self) -> Option<u32> {
        match self {
            EventDetails::Income(d) | EventDetails::AnnuityPayment(d) => d.end_month_offset,
            EventDetails::Expense(d) => d.end_month_offset,
            EventDetails::OneTimeExpense(_) => None,
            EventDetails::Contribution(d) => d.end_month_offset,
            EventDetails::Withdrawal(d) | EventDetails::RothConversion(d) => d.end_month_offset,
            EventDetails::MegaBackdoorRoth(d) => d.end_month_offset,
            EventDetails::SocialSecurityIncome(d) => d.end_month_offset,
            EventDetails::HealthcareCost(d) => d.end_month_offset,
            EventDetails::DisabilityInsurancePayout(d) => d.end_month_offset,
        }
    }

    pub fn is_taxable_income(&self) -> bool {
        match self {
            EventDetails::Income(d) | EventDetails::AnnuityPayment(d) => d.taxable.unwrap_or(true),
            EventDetails::SocialSecurityIncome(_) => true,
            EventDetails::DisabilityInsurancePayout(d) => d.taxable.unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialEvent {
    pub id: String,
    pub month_offset: u32,
    pub amount: f64,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl FinancialEvent {
    pub fn event_type(&self) -> EventType {
        self.details.event_type()
    }

    pub fn is_active(&self, month: u32) -> bool {
        if month < self.month_offset {
            return false;
        }
        if let Some(end) = self.details.end_month_offset() {
            if month > end {
                return false;
            }
        }
        if let EventDetails::DisabilityInsurancePayout(d) = &self.details {
            if let Some(period) = d.benefit_period_months {
                if month - self.month_offset >= period {
                    return false;
                }
            }
        }
        match self.details.frequency().period_months() {
            Some(period) => (month - self.month_offset) % period == 0,
            None => month == self.month_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub asset_class: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredBalance {
    pub total_value: f64,
    pub holdings: Vec<Holding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AccountBalance {
    Plain(f64),
    Structured(StructuredBalance),
}

impl AccountBalance {
    pub fn total(&self) -> f64 {
        match self {
            AccountBalance::Plain(value) => *value,
            AccountBalance::Structured(structured) => structured.total_value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub expected_returns: BTreeMap<String, f64>,
    pub volatilities: BTreeMap<String, f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    TaxEfficient,
    ProRata,
    CashFirst,
    TaxableFirst,
    TaxDeferredFirst,
    RothFirst,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::TaxEfficient,
        StrategyKind::ProRata,
        StrategyKind::CashFirst,
        StrategyKind::TaxableFirst,
        StrategyKind::TaxDeferredFirst,
        StrategyKind::RothFirst,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            StrategyKind::TaxEfficient => "TAX_EFFICIENT",
            StrategyKind::ProRata => "PRO_RATA",
            StrategyKind::CashFirst => "CASH_FIRST",
            StrategyKind::TaxableFirst => "TAXABLE_FIRST",
            StrategyKind::TaxDeferredFirst => "TAX_DEFERRED_FIRST",
            StrategyKind::RothFirst => "ROTH_FIRST",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn drawdown_order(self) -> [AccountType; 5] {
        use AccountType::{FiveTwentyNine, Hsa, Roth, TaxDeferred, Taxable};
        match self {
            StrategyKind::TaxEfficient | StrategyKind::CashFirst | StrategyKind::TaxableFirst => {
                [Taxable, TaxDeferred, Roth, Hsa, FiveTwentyNine]
            }
            StrategyKind::ProRata => [Taxable, TaxDeferred, Roth, Hsa, FiveTwentyNine],
            StrategyKind::TaxDeferredFirst => [TaxDeferred, Taxable, Roth, Hsa, FiveTwentyNine],
            StrategyKind::RothFirst => [Roth, Taxable, TaxDeferred, Hsa, FiveTwentyNine],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WithdrawalStrategy {
    pub strategy: StrategyKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target_amount: f64,
    pub target_month: u32,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationInput {
    pub initial_accounts: BTreeMap<AccountType, AccountBalance>,
    pub events: Vec<FinancialEvent>,
    pub config: SimulationConfig,
    pub months_to_run: u32,
    pub withdrawal_strategy: WithdrawalStrategy,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySnapshot {
    pub month_offset: u32,
    pub net_worth: f64,
    pub accounts: BTreeMap<AccountType, AccountBalance>,
    pub income_this_month: f64,
    pub expenses_this_month: f64,
    pub contributions_to_investments_this_month: f64,
    pub one_time_events_impact_this_month: f64,
    pub roth_conversion_amount_this_month: f64,
    pub withdrawals_this_month: f64,
    #[serde(rename = "ordinaryIncomeForTaxYTD")]
    pub ordinary_income_for_tax_ytd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalOutcome {
    pub goal_id: String,
    pub achieved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_worth_at_target: Option<f64>,
    pub shortfall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub monthly_data: Vec<MonthlySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_net_worth: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub goal_outcomes: Vec<GoalOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_probability: Option<f64>,
}
