use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::core::{
    CommandEngine, ReferenceEngine, RunError, RunOutcome, RunnerConfig, Simulator,
    ValidationError, validate_input, validate_output,
};
use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(
    name = "plansim",
    about = "Validates financial plans and runs them through a simulation engine"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PLANSIM_LOG_LEVEL",
        default_value = "info",
        help = "Log filter directives; RUST_LOG takes precedence when set"
    )]
    pub log_level: String,
    #[arg(long, global = true, env = "PLANSIM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Check a SimulationInput document and list every problem found.
    ValidateInput { file: PathBuf },
    /// Check an engine reply against the horizon it was asked for.
    ValidateOutput {
        file: PathBuf,
        #[arg(long)]
        months_to_run: u32,
    },
    /// Validate a plan, run it and print the validated output.
    Run {
        file: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "PLANSIM_PORT", default_value_t = 8080)]
    pub port: u16,
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    #[arg(
        long,
        env = "PLANSIM_ENGINE_COMMAND",
        help = "External engine command line; the built-in reference engine is used when unset"
    )]
    pub engine_command: Option<String>,
    #[arg(long, env = "PLANSIM_ENGINE_TIMEOUT_MS", default_value_t = 30_000)]
    pub engine_timeout_ms: u64,
    #[arg(long, env = "PLANSIM_RETRY_BACKOFF_MS", default_value_t = 250)]
    pub retry_backoff_ms: u64,
}

impl EngineArgs {
    pub fn runner_config(&self) -> Result<RunnerConfig, String> {
        if self.engine_timeout_ms == 0 {
            return Err("--engine-timeout-ms must be > 0".to_string());
        }
        Ok(RunnerConfig {
            timeout: Duration::from_millis(self.engine_timeout_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            ..RunnerConfig::default()
        })
    }

    fn command_engine(&self) -> Result<Option<CommandEngine>, String> {
        match self.engine_command.as_deref() {
            None => Ok(None),
            Some(line) => CommandEngine::from_command_line(line)
                .map(Some)
                .ok_or_else(|| "--engine-command must name a program".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}\n{}", render_lines(.errors))]
    Invalid {
        context: String,
        errors: Vec<ValidationError>,
    },
    #[error(transparent)]
    Run(RunError),
    #[error("engine rejected the plan: {0}")]
    Rejected(String),
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
    #[error("could not encode output: {0}")]
    Encode(#[source] serde_json::Error),
}

fn render_lines(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InputReport {
    valid: bool,
    months_to_run: u32,
    event_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputReport {
    valid: bool,
    success: bool,
    month_count: usize,
}

pub async fn execute(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::ValidateInput { file } => {
            let candidate = read_json(&file).await?;
            let input = validate_input(&candidate).map_err(|errors| CliError::Invalid {
                context: format!("{} is not a valid simulation input", file.display()),
                errors,
            })?;
            print_json(&InputReport {
                valid: true,
                months_to_run: input.months_to_run,
                event_count: input.events.len(),
            })
        }
        Command::ValidateOutput {
            file,
            months_to_run,
        } => {
            let candidate = read_json(&file).await?;
            let output = validate_output(&candidate, months_to_run).map_err(|errors| {
                CliError::Invalid {
                    context: format!("{} is not a valid simulation output", file.display()),
                    errors,
                }
            })?;
            print_json(&OutputReport {
                valid: true,
                success: output.success,
                month_count: output.monthly_data.len(),
            })
        }
        Command::Run { file, engine } => {
            let candidate = read_json(&file).await?;
            let config = engine.runner_config().map_err(CliError::Config)?;
            let outcome = match engine.command_engine().map_err(CliError::Config)? {
                Some(command) => Simulator::new(command, config).run(&candidate).await,
                None => Simulator::new(ReferenceEngine, config).run(&candidate).await,
            };
            report_outcome(outcome)
        }
    }
}

async fn serve(args: ServeArgs) -> Result<(), CliError> {
    let config = args.engine.runner_config().map_err(CliError::Config)?;
    let served = match args.engine.command_engine().map_err(CliError::Config)? {
        Some(command) => {
            info!(engine = ?command, "using external engine");
            super::run_http_server(args.port, Simulator::new(command, config)).await
        }
        None => {
            info!("using built-in reference engine");
            super::run_http_server(args.port, Simulator::new(ReferenceEngine, config)).await
        }
    };
    served.map_err(CliError::Serve)
}

fn report_outcome(outcome: Result<RunOutcome, RunError>) -> Result<(), CliError> {
    match outcome {
        Ok(RunOutcome::Completed(output)) => print_json(&output),
        Ok(RunOutcome::Rejected { reason, output }) => {
            print_json(&output)?;
            Err(CliError::Rejected(reason))
        }
        Err(err) if !err.errors().is_empty() => Err(CliError::Invalid {
            context: err.to_string(),
            errors: err.errors().to_vec(),
        }),
        Err(err) => Err(CliError::Run(err)),
    }
}

async fn read_json(path: &Path) -> Result<Value, CliError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(CliError::Encode)?;
    println!("{text}");
    Ok(())
}
