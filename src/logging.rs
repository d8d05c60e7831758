use clap::ValueEnum;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: ParseError,
    },
    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

pub fn resolve_filter(level: &str, env_override: Option<&str>) -> String {
    match env_override.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => level.to_string(),
    }
}

pub fn init(level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let env_override = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = resolve_filter(level, env_override.as_deref());
    let env_filter = EnvFilter::try_new(&filter)
        .map_err(|source| LoggingError::InvalidFilter { filter, source })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_when_present() {
        assert_eq!(resolve_filter("info", Some("plansim=debug")), "plansim=debug");
        assert_eq!(resolve_filter("info", Some("   ")), "info");
        assert_eq!(resolve_filter("warn", None), "warn");
    }

    #[test]
    fn invalid_level_is_reported() {
        let err = EnvFilter::try_new("plansim=loud")
            .map_err(|source| LoggingError::InvalidFilter {
                filter: "plansim=loud".into(),
                source,
            })
            .expect_err("not a level");
        assert!(err.to_string().contains("plansim=loud"));
    }
}
