use std::process::ExitCode;

use clap::Parser;
use plansim::api::{Cli, execute};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = plansim::logging::init(&cli.log_level, cli.log_format) {
        eprintln!("Logging error: {e}");
        return ExitCode::FAILURE;
    }

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
