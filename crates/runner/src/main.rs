//! Command-line entry point
//!
//! Usage: `runner [config.json]` (default `configs/host-md.json`).

use std::process::ExitCode;
use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "configs/host-md.json";

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runner=info,accel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let start = Instant::now();
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let report = match runner::run_from_file(&config_path) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    println!(
        "\nTotal execution time in ms = {}",
        start.elapsed().as_millis()
    );
    println!(
        "\nKernel execution time in milliseconds = {:.3} ms",
        report.kernel_ms()
    );
    println!(
        "\nKernel execution time in milliseconds per iters = {:.3} ms",
        report.kernel_ms_per_iteration()
    );
    ExitCode::SUCCESS
}
