use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::types::SimulationInput;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFailure {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine crashed: {0}")]
    Crashed(String),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine transport failed: {0}")]
    Transport(String),
}

impl EngineFailure {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineFailure::Crashed(_))
    }
}

pub trait SimulationEngine: Send + Sync {
    fn run(
        &self,
        input: &SimulationInput,
    ) -> impl Future<Output = Result<Value, EngineFailure>> + Send;
}

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }
}

impl SimulationEngine for CommandEngine {
    fn run(
        &self,
        input: &SimulationInput,
    ) -> impl Future<Output = Result<Value, EngineFailure>> + Send {
        let payload = serde_json::to_vec(input);
        async move {
            let payload = payload
                .map_err(|e| EngineFailure::Transport(format!("could not encode input: {e}")))?;

            let mut child = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    EngineFailure::Unavailable(format!("{}: {e}", self.program.display()))
                })?;

            let writer = child.stdin.take().map(|mut stdin| {
                tokio::spawn(async move {
                    stdin.write_all(&payload).await?;
                    stdin.shutdown().await
                })
            });

            let output = child
                .wait_with_output()
                .await
                .map_err(|e| EngineFailure::Transport(format!("waiting for engine: {e}")))?;

            if let Some(writer) = writer {
                if let Ok(Err(err)) = writer.await {
                    debug!(error = %err, "engine closed stdin before reading the full input");
                }
            }

            if !output.status.success() {
                return Err(EngineFailure::Crashed(format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }

            serde_json::from_slice(&output.stdout)
                .map_err(|e| EngineFailure::Crashed(format!("unparsable reply: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validation::validate_input;
    use serde_json::json;

    fn tiny_input() -> SimulationInput {
        validate_input(&json!({
            "initialAccounts": {"cash": 100},
            "events": [],
            "config": {"expectedReturns": {}, "volatilities": {}},
            "monthsToRun": 1,
            "withdrawalStrategy": {"strategy": "CASH_FIRST"}
        }))
        .expect("valid input")
    }

    #[test]
    fn crashes_are_not_retryable() {
        assert!(!EngineFailure::Crashed("boom".into()).is_retryable());
        assert!(EngineFailure::Unavailable("wasm not loaded".into()).is_retryable());
        assert!(EngineFailure::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(EngineFailure::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn command_line_is_split_on_whitespace() {
        let engine = CommandEngine::from_command_line("node  engine.mjs --json").expect("program");
        assert_eq!(engine.program, PathBuf::from("node"));
        assert_eq!(engine.args, vec!["engine.mjs", "--json"]);
        assert!(CommandEngine::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let engine = CommandEngine::new("/definitely/not/an/engine");
        let err = engine.run(&tiny_input()).await.expect_err("must fail");
        assert!(matches!(err, EngineFailure::Unavailable(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reply_is_read_from_stdout() {
        let engine = CommandEngine::new("sh")
            .with_args(["-c", r#"cat >/dev/null; printf '{"success":false,"error":"nope"}'"#]);
        let reply = engine.run(&tiny_input()).await.expect("engine replies");
        assert_eq!(reply, json!({"success": false, "error": "nope"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_crash() {
        let engine = CommandEngine::new("sh").with_args(["-c", "echo wasm trap >&2; exit 3"]);
        let err = engine.run(&tiny_input()).await.expect_err("must fail");
        match err {
            EngineFailure::Crashed(message) => assert!(message.contains("wasm trap")),
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn garbage_on_stdout_is_a_crash() {
        let engine = CommandEngine::new("sh").with_args(["-c", "cat >/dev/null; echo not-json"]);
        let err = engine.run(&tiny_input()).await.expect_err("must fail");
        assert!(matches!(err, EngineFailure::Crashed(_)), "got {err:?}");
    }
}
