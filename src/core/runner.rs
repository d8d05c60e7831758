use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::engine::{EngineFailure, SimulationEngine};
use super::types::{SimulationInput, SimulationOutput};
use super::validation::{ValidationError, check_flow_integrity, validate_input, validate_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub timeout: Duration,
    pub retry_backoff: Duration,
    // Total engine calls per run, first attempt included.
    pub max_attempts: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(250),
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(SimulationOutput),
    Rejected {
        reason: String,
        output: SimulationOutput,
    },
}

impl RunOutcome {
    pub fn output(&self) -> &SimulationOutput {
        match self {
            RunOutcome::Completed(output) | RunOutcome::Rejected { output, .. } => output,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("input failed validation with {} error(s)", .0.len())]
    InvalidInput(Vec<ValidationError>),
    #[error(transparent)]
    Engine(#[from] EngineFailure),
    #[error("engine reply failed validation with {} error(s)", .0.len())]
    InvalidOutput(Vec<ValidationError>),
    #[error("engine reply dropped active flows in {} place(s)", .0.len())]
    OutputIntegrity(Vec<ValidationError>),
    #[error("run was superseded by a newer request")]
    Superseded,
}

impl RunError {
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            RunError::InvalidInput(errors)
            | RunError::InvalidOutput(errors)
            | RunError::OutputIntegrity(errors) => errors,
            RunError::Engine(_) | RunError::Superseded => &[],
        }
    }
}

pub struct Simulator<E> {
    engine: E,
    config: RunnerConfig,
    generation: watch::Sender<u64>,
    latest: RwLock<Option<RunOutcome>>,
}

impl<E: SimulationEngine> Simulator<E> {
    pub fn new(engine: E, config: RunnerConfig) -> Self {
        Self {
            engine,
            config,
            generation: watch::Sender::new(0),
            latest: RwLock::new(None),
        }
    }

    pub fn config(&self) -> RunnerConfig {
        self.config
    }

    pub async fn run(&self, candidate: &Value) -> Result<RunOutcome, RunError> {
        let input = validate_input(candidate).map_err(|errors| {
            warn!(errors = errors.len(), "rejected simulation input");
            RunError::InvalidInput(errors)
        })?;
        info!(
            events = input.events.len(),
            months_to_run = input.months_to_run,
            "starting simulation"
        );

        let reply = self.call_engine(&input).await?;
        let claims_success = reply.get("success") == Some(&Value::Bool(true));
        let output = validate_output(&reply, input.months_to_run).map_err(|errors| {
            warn!(errors = errors.len(), claims_success, "engine reply failed validation");
            if claims_success {
                RunError::OutputIntegrity(errors)
            } else {
                RunError::InvalidOutput(errors)
            }
        })?;

        if !output.success {
            let reason = output
                .error
                .clone()
                .unwrap_or_else(|| "engine rejected the plan without a reason".to_string());
            info!(%reason, "engine rejected plan");
            return Ok(RunOutcome::Rejected { reason, output });
        }

        let integrity = check_flow_integrity(&input, &output);
        if !integrity.is_empty() {
            warn!(errors = integrity.len(), "engine reply dropped active flows");
            return Err(RunError::OutputIntegrity(integrity));
        }

        info!(
            months = output.monthly_data.len(),
            final_net_worth = output.final_net_worth.unwrap_or_default(),
            "simulation completed"
        );
        Ok(RunOutcome::Completed(output))
    }

    /// Like [`Simulator::run`], but a newer call supersedes this one: the
    /// older run resolves to [`RunError::Superseded`] and never replaces the
    /// stored latest outcome.
    pub async fn run_latest(&self, candidate: &Value) -> Result<RunOutcome, RunError> {
        let mut generation = 0;
        self.generation.send_modify(|current| {
            *current += 1;
            generation = *current;
        });
        let mut newer = self.generation.subscribe();

        let result = tokio::select! {
            result = self.run(candidate) => result,
            _ = async {
                let _ = newer.wait_for(|current| *current != generation).await;
            } => {
                info!(generation, "simulation superseded while running");
                return Err(RunError::Superseded);
            }
        };

        let mut latest = self.latest.write().await;
        if *self.generation.borrow() != generation {
            return Err(RunError::Superseded);
        }
        if let Ok(outcome) = &result {
            *latest = Some(outcome.clone());
        }
        result
    }

    pub async fn latest(&self) -> Option<RunOutcome> {
        self.latest.read().await.clone()
    }

    async fn call_engine(&self, input: &SimulationInput) -> Result<Value, EngineFailure> {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.config.timeout, self.engine.run(input)).await {
                Ok(result) => result,
                Err(_) => Err(EngineFailure::Timeout(self.config.timeout)),
            };
            match result {
                Ok(reply) => return Ok(reply),
                Err(failure) if failure.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(attempt, error = %failure, "engine call failed, retrying");
                    sleep(self.config.retry_backoff).await;
                    attempt += 1;
                }
                Err(failure) => {
                    warn!(attempt, error = %failure, "engine call failed");
                    return Err(failure);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reference::simulate;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Step = (Duration, Result<Value, EngineFailure>);

    struct ScriptedEngine {
        script: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SimulationEngine for ScriptedEngine {
        fn run(
            &self,
            _input: &SimulationInput,
        ) -> impl Future<Output = Result<Value, EngineFailure>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().expect("script lock").pop_front();
            async move {
                let Some((delay, reply)) = step else {
                    return Err(EngineFailure::Unavailable("script exhausted".into()));
                };
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                reply
            }
        }
    }

    fn sample_plan() -> Value {
        json!({
            "initialAccounts": {"cash": 10000},
            "events": [{"id": "pay", "type": "INCOME", "monthOffset": 0, "amount": 5000}],
            "config": {"expectedReturns": {}, "volatilities": {}},
            "monthsToRun": 2,
            "withdrawalStrategy": {"strategy": "TAX_EFFICIENT"}
        })
    }

    fn good_reply() -> Value {
        let input = validate_input(&sample_plan()).expect("valid plan");
        serde_json::to_value(simulate(&input)).expect("serializable")
    }

    fn quick_config() -> RunnerConfig {
        RunnerConfig {
            timeout: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(5),
            max_attempts: 2,
        }
    }

    fn simulator(steps: Vec<Step>) -> Simulator<ScriptedEngine> {
        Simulator::new(ScriptedEngine::new(steps), quick_config())
    }

    #[tokio::test]
    async fn completed_run_returns_validated_output() {
        let sim = simulator(vec![(Duration::ZERO, Ok(good_reply()))]);
        let outcome = sim.run(&sample_plan()).await.expect("run completes");
        match outcome {
            RunOutcome::Completed(output) => {
                assert_eq!(output.monthly_data.len(), 2);
                assert_eq!(output.monthly_data[0].income_this_month, 5000.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_engine() {
        let sim = simulator(vec![(Duration::ZERO, Ok(good_reply()))]);
        let mut plan = sample_plan();
        plan.as_object_mut().expect("object").remove("events");

        let err = sim.run(&plan).await.expect_err("must reject");
        assert!(matches!(err, RunError::InvalidInput(_)), "got {err:?}");
        assert_eq!(err.errors()[0].path, "events");
        assert_eq!(sim.engine.calls(), 0);
    }

    #[tokio::test]
    async fn timed_out_call_is_retried_once() {
        let sim = simulator(vec![
            (Duration::from_millis(500), Ok(good_reply())),
            (Duration::ZERO, Ok(good_reply())),
        ]);
        let outcome = sim.run(&sample_plan()).await.expect("second attempt succeeds");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(sim.engine.calls(), 2);
    }

    #[tokio::test]
    async fn retries_stop_after_max_attempts() {
        let sim = simulator(vec![
            (Duration::ZERO, Err(EngineFailure::Unavailable("not loaded".into()))),
            (Duration::ZERO, Err(EngineFailure::Unavailable("still not loaded".into()))),
            (Duration::ZERO, Ok(good_reply())),
        ]);
        let err = sim.run(&sample_plan()).await.expect_err("must fail");
        assert_eq!(
            err,
            RunError::Engine(EngineFailure::Unavailable("still not loaded".into()))
        );
        assert_eq!(sim.engine.calls(), 2);
    }

    #[tokio::test]
    async fn crashes_are_not_retried() {
        let sim = simulator(vec![
            (Duration::ZERO, Err(EngineFailure::Crashed("trap".into()))),
            (Duration::ZERO, Ok(good_reply())),
        ]);
        let err = sim.run(&sample_plan()).await.expect_err("must fail");
        assert!(matches!(err, RunError::Engine(EngineFailure::Crashed(_))));
        assert_eq!(sim.engine.calls(), 1);
    }

    #[tokio::test]
    async fn in_band_rejection_is_an_outcome_not_an_error() {
        let reply = json!({"success": false, "error": "insufficient funds in month 3"});
        let sim = simulator(vec![(Duration::ZERO, Ok(reply))]);
        match sim.run(&sample_plan()).await.expect("conformant reply") {
            RunOutcome::Rejected { reason, output } => {
                assert_eq!(reason, "insufficient funds in month 3");
                assert!(output.monthly_data.is_empty());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_successful_reply_is_an_integrity_failure() {
        let reply = json!({"success": true, "monthlyData": [], "finalNetWorth": 0});
        let sim = simulator(vec![(Duration::ZERO, Ok(reply))]);
        let err = sim.run(&sample_plan()).await.expect_err("must fail");
        match err {
            RunError::OutputIntegrity(errors) => {
                assert!(errors.iter().any(|e| e.path == "monthlyData"), "{errors:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_net_worth_in_successful_reply_is_an_integrity_failure() {
        let mut reply = good_reply();
        reply["monthlyData"][1]["netWorth"] = Value::Null;
        let sim = simulator(vec![(Duration::ZERO, Ok(reply))]);
        let err = sim.run(&sample_plan()).await.expect_err("must fail");
        assert!(matches!(err, RunError::OutputIntegrity(_)), "got {err:?}");
        assert!(err.errors().iter().any(|e| e.path == "monthlyData[1].netWorth"));
    }

    #[tokio::test]
    async fn malformed_rejection_is_invalid_output() {
        for reply in [
            json!({"success": false, "monthlyData": "oops"}),
            json!({"monthlyData": []}),
            json!({"success": "yes", "monthlyData": []}),
        ] {
            let sim = simulator(vec![(Duration::ZERO, Ok(reply.clone()))]);
            let err = sim.run(&sample_plan()).await.expect_err("must fail");
            assert!(matches!(err, RunError::InvalidOutput(_)), "{reply} gave {err:?}");
        }
    }

    #[tokio::test]
    async fn dropped_income_fails_integrity_check() {
        let month = |offset: u32| {
            json!({"monthOffset": offset, "netWorth": 10000, "accounts": {"cash": 10000},
                   "incomeThisMonth": 0})
        };
        let reply = json!({
            "success": true,
            "monthlyData": [month(0), month(1)],
            "finalNetWorth": 10000
        });
        let sim = simulator(vec![(Duration::ZERO, Ok(reply))]);
        let err = sim.run(&sample_plan()).await.expect_err("must fail");
        assert!(matches!(err, RunError::OutputIntegrity(_)), "got {err:?}");
        assert_eq!(err.errors()[0].path, "monthlyData[0].incomeThisMonth");
        assert_eq!(err.errors().len(), 2);
    }

    #[tokio::test]
    async fn offsetting_income_completes_through_reference_engine() {
        let mut plan = sample_plan();
        plan["events"]
            .as_array_mut()
            .expect("events")
            .push(json!({"id": "clawback", "type": "INCOME", "monthOffset": 0, "amount": -5000}));
        let input = validate_input(&plan).expect("valid plan");
        let reply = serde_json::to_value(simulate(&input)).expect("serializable");
        assert_eq!(reply["monthlyData"][0]["incomeThisMonth"], 0.0);

        let sim = simulator(vec![(Duration::ZERO, Ok(reply))]);
        let outcome = sim.run(&plan).await.expect("net-zero income is not a dropped flow");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn newer_run_supersedes_older_one() {
        let sim = simulator(vec![
            (Duration::from_millis(80), Ok(good_reply())),
            (Duration::ZERO, Ok(good_reply())),
        ]);
        let plan = sample_plan();

        let (older, newer) = tokio::join!(sim.run_latest(&plan), async {
            sleep(Duration::from_millis(10)).await;
            sim.run_latest(&plan).await
        });

        assert_eq!(older, Err(RunError::Superseded));
        assert!(matches!(newer, Ok(RunOutcome::Completed(_))));
        assert_eq!(sim.latest().await, newer.ok());
    }

    #[tokio::test]
    async fn failed_latest_run_keeps_previous_outcome() {
        let sim = simulator(vec![
            (Duration::ZERO, Ok(good_reply())),
            (Duration::ZERO, Err(EngineFailure::Crashed("trap".into()))),
        ]);
        let first = sim.run_latest(&sample_plan()).await.expect("first run");
        sim.run_latest(&sample_plan()).await.expect_err("second run fails");
        assert_eq!(sim.latest().await, Some(first));
    }

    #[test]
    fn default_config_allows_one_retry() {
        let config = RunnerConfig::default();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
