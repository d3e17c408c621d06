use std::{process::ExitCode, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::{io::AsyncReadExt, select};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    model::{anthropic::AnthropicClient, config::ModelConfig},
    pipeline::{
        error::ProcessingError,
        expander::expand,
        tracker::RequestTracker,
        AuditSink, NoAudit, ProcessedEntries, ProcessingResult, TimeEntryProcessor,
    },
    storage::settings_store::SettingsStore,
    utils::clock::DefaultClock,
};

use super::{shutdown::detect_shutdown, CliContext};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
pub struct ProcessCommand {
    #[arg(help = "Description of the work day. Read from stdin when missing")]
    input: Option<String>,
    #[arg(long, help = "Print the markdown explanation after the rows")]
    explain: bool,
    #[arg(
        long,
        conflicts_with = "explain",
        help = "Print the result as {success, formattedOutput, explanation, error} JSON"
    )]
    json: bool,
    #[arg(
        long,
        default_value_t = 0,
        help = "Retry transient failures (timeouts, rate limits, outages) up to this many times"
    )]
    retries: u32,
    #[arg(long, help = "Seconds to wait for the model. Defaults to 60")]
    timeout: Option<u64>,
    #[arg(long, help = "Model to use instead of $TIMESCRIPT_MODEL or the default one")]
    model: Option<String>,
    #[arg(long, help = "Don't record this run in history")]
    no_history: bool,
}

/// Reads the argument or, when it's missing, everything piped into stdin.
pub async fn read_input(input: Option<String>) -> Result<String> {
    match input {
        Some(v) => Ok(v),
        None => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            Ok(buffer)
        }
    }
}

pub async fn process_expand_command(context: &CliContext, input: Option<String>) -> Result<()> {
    let input = read_input(input).await?;
    let profile = context.store.load().await?;
    println!("{}", expand(&input, &profile.slash_commands));
    Ok(())
}

/// Command to process `process` command. Sends the input through the whole pipeline and
/// prints rows to stdout, everything else goes to stderr.
pub async fn process_process_command(
    context: &CliContext,
    command: ProcessCommand,
) -> Result<ExitCode> {
    let input = read_input(command.input.clone()).await?;
    let config = ModelConfig::from_env()
        .with_timeout(command.timeout.map(Duration::from_secs))
        .with_model(command.model.clone());
    let timeout = config.timeout;
    let client = AnthropicClient::new(config);
    info!("Using model {}", client.model_name());

    let cancellation = CancellationToken::new();
    tokio::spawn(detect_shutdown(cancellation.clone()));

    let code = if command.no_history {
        let processor = TimeEntryProcessor::new(Box::new(client), NoAudit, Box::new(DefaultClock))
            .with_timeout(timeout)
            .with_cancellation(cancellation.clone());
        run(context, &processor, &input, &command, &cancellation).await
    } else {
        let processor =
            TimeEntryProcessor::new(Box::new(client), context.history()?, Box::new(DefaultClock))
                .with_timeout(timeout)
                .with_cancellation(cancellation.clone());
        run(context, &processor, &input, &command, &cancellation).await
    };
    cancellation.cancel();
    code
}

async fn run<A: AuditSink>(
    context: &CliContext,
    processor: &TimeEntryProcessor<A>,
    input: &str,
    command: &ProcessCommand,
    cancellation: &CancellationToken,
) -> Result<ExitCode> {
    let result =
        submit_with_retries(processor, &context.store, input, command.retries, cancellation).await;

    if command.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ProcessingResult::from(&result))?
        );
    }

    match result {
        Ok(processed) => {
            for warning in &processed.format_warnings {
                eprintln!("Warning: {warning}");
            }
            if !command.json {
                println!("{}", processed.formatted_output);
                if command.explain {
                    println!();
                    println!("{}", processed.explanation);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if let Some(detail) = e.detail() {
                debug!("Failure details: {detail}");
            }
            if !command.json {
                eprintln!("Error: {e}");
                if matches!(e, ProcessingError::Unauthenticated) {
                    eprintln!("Run `timescript init --profile {}` first", context.profile);
                }
            }
            Ok(ExitCode::from(e.class().exit_code()))
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// Submits `input` and retries transient failures. Each attempt reads a fresh profile, so
/// settings edited in between are picked up.
pub async fn submit_with_retries<A: AuditSink>(
    processor: &TimeEntryProcessor<A>,
    store: &impl SettingsStore,
    input: &str,
    retries: u32,
    cancellation: &CancellationToken,
) -> Result<ProcessedEntries, ProcessingError> {
    let mut tracker = RequestTracker::new();
    let profile = store.load().await?;
    let mut result = tracker.submit(processor, &profile, input).await;

    loop {
        let error = match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && tracker.attempts() <= retries => e,
            Err(e) => return Err(e),
        };

        let delay = error
            .retry_after()
            .unwrap_or_else(|| backoff(tracker.attempts()));
        warn!("Attempt {} failed: {error}", tracker.attempts());
        eprintln!("{error} Retrying in {}s", delay.as_secs());
        select! {
            _ = cancellation.cancelled() => return Err(ProcessingError::Cancelled),
            _ = processor.clock().sleep(delay) => {}
        }

        let profile = store.load().await?;
        result = tracker.retry(processor, &profile).await;
    }
}
