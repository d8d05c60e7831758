use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Json, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    DraftSummary, EventDraft, FieldErrors, PlanCalendar, RunError, RunOutcome, SimulationEngine,
    SimulationOutput, Simulator, ValidationError, YearMonth, apply_defaults, build_event,
    display_ages, display_dates, resolve_claiming_age, summarize, validate_input, validate_output,
};

mod cli;

pub use cli::{Cli, CliError, Command, EngineArgs, ServeArgs, execute};

pub struct AppState<E> {
    simulator: Arc<Simulator<E>>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            simulator: Arc::clone(&self.simulator),
        }
    }
}

impl<E> AppState<E> {
    pub fn new(simulator: Simulator<E>) -> Self {
        Self {
            simulator: Arc::new(simulator),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct ValidationFailure<'a> {
    errors: &'a [ValidationError],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InputValidResponse {
    valid: bool,
    months_to_run: u32,
    event_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputQuery {
    months_to_run: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputValidResponse {
    valid: bool,
    success: bool,
    month_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_net_worth: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    output: &'a SimulationOutput,
}

impl<'a> From<&'a RunOutcome> for SimulateResponse<'a> {
    fn from(outcome: &'a RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed(output) => Self {
                status: "completed",
                reason: None,
                output,
            },
            RunOutcome::Rejected { reason, output } => Self {
                status: "rejected",
                reason: Some(reason),
                output,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct EngineErrorResponse {
    error: String,
    retryable: bool,
}

#[derive(Debug, Serialize)]
struct OutputErrorResponse<'a> {
    error: String,
    kind: &'static str,
    errors: &'a [ValidationError],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftPreviewRequest {
    draft: EventDraft,
    #[serde(default)]
    calendar: Option<PlanCalendar>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftPreviewResponse {
    draft: EventDraft,
    summary: DraftSummary,
    field_errors: FieldErrors,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    dates: BTreeMap<String, YearMonth>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    ages: BTreeMap<String, u32>,
}

pub fn build_router<E: SimulationEngine + 'static>(state: AppState<E>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/validate/input", post(validate_input_handler))
        .route("/api/validate/output", post(validate_output_handler))
        .route("/api/simulate", post(simulate_handler::<E>))
        .route("/api/simulate/latest", get(latest_handler::<E>))
        .route("/api/drafts/preview", post(draft_preview_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server<E: SimulationEngine + 'static>(
    port: u16,
    simulator: Simulator<E>,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let config = simulator.config();
    let app = build_router(AppState::new(simulator));

    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        timeout_ms = config.timeout.as_millis() as u64,
        max_attempts = config.max_attempts,
        "plansim HTTP API listening"
    );

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn validate_input_handler(payload: Result<Json<Value>, JsonRejection>) -> Response {
    let candidate = match payload {
        Ok(Json(candidate)) => candidate,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match validate_input(&candidate) {
        Ok(input) => json_response(
            StatusCode::OK,
            InputValidResponse {
                valid: true,
                months_to_run: input.months_to_run,
                event_count: input.events.len(),
            },
        ),
        Err(errors) => validation_failure(&errors),
    }
}

async fn validate_output_handler(
    query: Result<Query<OutputQuery>, QueryRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let months_to_run = match query {
        Ok(Query(query)) => query.months_to_run,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    let candidate = match payload {
        Ok(Json(candidate)) => candidate,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match validate_output(&candidate, months_to_run) {
        Ok(output) => json_response(
            StatusCode::OK,
            OutputValidResponse {
                valid: true,
                success: output.success,
                month_count: output.monthly_data.len(),
                final_net_worth: output.final_net_worth,
            },
        ),
        Err(errors) => validation_failure(&errors),
    }
}

async fn simulate_handler<E: SimulationEngine + 'static>(
    State(state): State<AppState<E>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let candidate = match payload {
        Ok(Json(candidate)) => candidate,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match state.simulator.run_latest(&candidate).await {
        Ok(outcome) => json_response(StatusCode::OK, SimulateResponse::from(&outcome)),
        Err(err) => run_error_response(&err),
    }
}

async fn latest_handler<E: SimulationEngine + 'static>(State(state): State<AppState<E>>) -> Response {
    match state.simulator.latest().await {
        Some(outcome) => json_response(StatusCode::OK, SimulateResponse::from(&outcome)),
        None => error_response(StatusCode::NOT_FOUND, "No simulation has completed yet"),
    }
}

async fn draft_preview_handler(payload: Result<Json<DraftPreviewRequest>, JsonRejection>) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    let calendar = match request.calendar {
        Some(c) => match PlanCalendar::new(c.start_year, c.start_month, c.current_age) {
            Ok(calendar) => Some(calendar),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("calendar: {e}")),
        },
        None => None,
    };

    let draft = match &calendar {
        Some(calendar) => apply_defaults(&resolve_claiming_age(&request.draft, calendar)),
        None => apply_defaults(&request.draft),
    };
    let field_errors = build_event(&draft).err().unwrap_or_default();
    let (dates, ages) = calendar
        .map(|calendar| (display_dates(&draft, &calendar), display_ages(&draft, &calendar)))
        .unwrap_or_default();
    json_response(
        StatusCode::OK,
        DraftPreviewResponse {
            summary: summarize(&draft),
            field_errors,
            dates,
            ages,
            draft,
        },
    )
}

fn run_error_response(err: &RunError) -> Response {
    match err {
        RunError::InvalidInput(errors) => validation_failure(errors),
        RunError::Engine(failure) => json_response(
            StatusCode::BAD_GATEWAY,
            EngineErrorResponse {
                error: failure.to_string(),
                retryable: failure.is_retryable(),
            },
        ),
        RunError::InvalidOutput(errors) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            OutputErrorResponse {
                error: err.to_string(),
                kind: "invalidOutput",
                errors,
            },
        ),
        RunError::OutputIntegrity(errors) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            OutputErrorResponse {
                error: err.to_string(),
                kind: "outputIntegrity",
                errors,
            },
        ),
        RunError::Superseded => error_response(StatusCode::CONFLICT, &err.to_string()),
    }
}

fn validation_failure(errors: &[ValidationError]) -> Response {
    json_response(StatusCode::UNPROCESSABLE_ENTITY, ValidationFailure { errors })
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
