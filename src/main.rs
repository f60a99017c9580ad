//! school-cases — Binary Entrypoint
//! Loads config, polls every school page under the download limit and writes
//! today's counts into the case-data sheet.
//!
//! Usage: `school-cases [DRY_RUN] [LOG_LEVEL]`

use std::process::ExitCode;

use school_cases::{cli, config, runner, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; SHEET_URL, TOKEN_FILE etc. may live there.
    let _ = dotenvy::dotenv();

    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("school-cases: {e:#}");
            eprintln!("usage: school-cases [DRY_RUN: 0|1] [LOG_LEVEL]");
            return ExitCode::from(2);
        }
    };
    telemetry::init(args.log_level);

    // Limiter misconfiguration and missing schools fail here, before any fetch.
    let cfg = match config::load_config_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match runner::run(&cfg, args.dry_run).await {
        Ok(report) => {
            report.log_summary();
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "run aborted");
            ExitCode::FAILURE
        }
    }
}
