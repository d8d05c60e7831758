mod calendar;
mod draft;
mod engine;
mod format;
mod reference;
mod runner;
mod types;
mod validation;

pub use calendar::{CalendarError, PlanCalendar, YearMonth};
pub use draft::{
    DATE_FIELDS, DraftSummary, EventDraft, FieldErrors, MEGA_BACKDOOR_DEFAULT_LIMIT,
    apply_defaults, build_event, contribution_limit, display_ages, display_date, display_dates,
    resolve_claiming_age, set_date, summarize,
};
pub use engine::{CommandEngine, EngineFailure, SimulationEngine};
pub use format::{format_number_with_commas, parse_formatted_number};
pub use reference::{ReferenceEngine, simulate};
pub use runner::{RunError, RunOutcome, RunnerConfig, Simulator};
pub use types::{
    AccountBalance, AccountType, EventDetails, EventType, FinancialEvent, Frequency, Goal,
    GoalOutcome, Holding, MonthlySnapshot, SimulationConfig, SimulationInput, SimulationOutput,
    StrategyKind, StructuredBalance, WithdrawalStrategy,
};
pub use validation::{
    NET_WORTH_EPSILON, ValidationError, ValidationResult, check_flow_integrity, validate_input,
    validate_output,
};
