mod analysis;
mod batch;
mod cli;
mod config;
mod error;
mod preprocess;
mod store;
mod ui;
mod workflow;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use analysis::RemoteClient;
use batch::{BatchConfig, BatchProcessor, RunMode, StopSignal};
use cli::{Cli, Command, PacingArgs};
use config::FramebatchConfig;
use store::BatchState;
use workflow::{BatchProfile, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command,
        model,
        state,
        verbose,
    } = Cli::parse();
    init_tracing(verbose);

    let mut config = FramebatchConfig::load()?;
    if let Some(model) = model {
        config.model = model;
    }

    match command {
        Command::Run {
            paths,
            workflow,
            pacing,
        } => run(&config, &state, workflow.into(), &paths, pacing).await,
        Command::Retry { pacing } => retry(&config, &state, pacing).await,
        Command::Status { limit } => status(&state, limit),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(
    config: &FramebatchConfig,
    state_path: &Path,
    workflow: Workflow,
    paths: &[PathBuf],
    pacing: PacingArgs,
) -> Result<()> {
    let files = preprocess::collect_inputs(paths)?;
    tracing::info!(files = files.len(), %workflow, "preprocessing inputs");
    let items = preprocess::build_items(&files, config.max_dimension);
    if items.is_empty() {
        bail!("None of the inputs could be turned into an image payload.");
    }

    let mut state = BatchState::new(workflow, items);
    execute(config, state_path, &mut state, RunMode::All, pacing).await
}

async fn retry(config: &FramebatchConfig, state_path: &Path, pacing: PacingArgs) -> Result<()> {
    let mut state = BatchState::load(state_path)?;
    execute(config, state_path, &mut state, RunMode::RetryFailed, pacing).await
}

fn status(state_path: &Path, limit: usize) -> Result<()> {
    let state = BatchState::load(state_path)?;
    ui::print_status(
        &state.workflow.to_string(),
        state.counts(),
        state.results.iter().take(limit),
    );
    Ok(())
}

fn apply_pacing(profile: BatchProfile, pacing: PacingArgs) -> BatchProfile {
    BatchProfile {
        batch_size: pacing.batch_size.unwrap_or(profile.batch_size),
        inter_batch_delay_ms: pacing.delay_ms.unwrap_or(profile.inter_batch_delay_ms),
    }
}

async fn execute(
    config: &FramebatchConfig,
    state_path: &Path,
    state: &mut BatchState,
    mode: RunMode,
    pacing: PacingArgs,
) -> Result<()> {
    let profile = apply_pacing(config.profile(state.workflow), pacing);
    let client = RemoteClient::with_base_url(
        config.base_url.clone(),
        config.model.clone(),
        state.workflow,
        config.retry.clone(),
    )?;
    let processor = BatchProcessor::new(client, BatchConfig::from_profile(&profile)?);

    let credentials = config.credentials();
    let total = batch::preflight(&state.items, &credentials, mode)?;

    let stop = processor.stop_signal();
    tokio::spawn(async move {
        if watch_interrupts(stop, tokio::signal::ctrl_c).await {
            std::process::exit(130);
        }
    });

    let progress = ui::BatchProgress::start(total);
    let summary = processor
        .run(&mut state.items, &credentials, mode, &progress)
        .await?;

    state.record(&summary);
    state.save(state_path)?;
    ui::print_summary(&summary);
    Ok(())
}

/// First interrupt stops the run at the next dispatch point; a second one
/// returns `true` so the caller can exit without waiting.
async fn watch_interrupts<F, Fut>(stop: StopSignal, mut next_interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::warn!("interrupt received, letting in-flight items finish (press Ctrl-C again to abort)");
    stop.stop();

    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::warn!("second interrupt, aborting");
    true
}
