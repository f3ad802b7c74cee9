//! Command-line interface built on clap.
//!
//! [`Cli`] holds the global flags (--model, --state, --verbose) and the
//! [`Command`] subcommands (run, retry, status).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::store::DEFAULT_STATE_FILE;
use crate::workflow::Workflow;

/// framebatch — rate-limited batch image analysis with LLM vision APIs.
#[derive(Debug, Parser)]
#[command(name = "framebatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Model identifier; overrides `model` in framebatch.toml.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Path of the state file shared by run, retry and status.
    #[arg(long, global = true, default_value = DEFAULT_STATE_FILE)]
    pub state: PathBuf,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Workflow accepted on the command line, mapped to [`Workflow`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WorkflowArg {
    /// Camera-motion prompts for image-to-video models.
    Prompt,
    /// Short image descriptions.
    Description,
    /// Stock-photo title, keywords and category.
    Metadata,
}

impl From<WorkflowArg> for Workflow {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Prompt => Workflow::Prompt,
            WorkflowArg::Description => Workflow::Description,
            WorkflowArg::Metadata => Workflow::Metadata,
        }
    }
}

/// Overrides for the workflow's wave size and cooldown.
#[derive(Debug, Clone, Copy, Default, clap::Args)]
pub struct PacingArgs {
    /// Items dispatched concurrently per wave.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between waves, in milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyzes images (files or directories) and starts a new state file.
    Run {
        /// Image files or directories containing images.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// What to generate for each image.
        #[arg(long, short, value_enum, default_value = "prompt")]
        workflow: WorkflowArg,

        #[command(flatten)]
        pacing: PacingArgs,
    },

    /// Re-runs only the items that failed in the state file.
    Retry {
        #[command(flatten)]
        pacing: PacingArgs,
    },

    /// Shows item counts and the most recent results.
    Status {
        /// Number of results to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}
