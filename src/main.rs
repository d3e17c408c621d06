use std::process::ExitCode;

use anyhow::Result;
use timescript::cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    run_cli().await.inspect_err(|e| {
        error!("Error running cli {e:?}");
    })
}
