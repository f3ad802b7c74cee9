//! Terminal output: a live progress bar and coloured summaries.
//!
//! Uses `indicatif` for the bar and `console` for styling. [`BatchProgress`]
//! is the [`ProgressSink`] the CLI hands to the processor.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{Outcome, ProgressEvent, ProgressSink, RunProgress, RunResult, RunSummary};
use crate::store::StatusCounts;

const PREVIEW_CHARS: usize = 72;

/// Progress bar driven by the processor's events.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }
}

impl ProgressSink for BatchProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::WaveStarted { wave, waves, size } => {
                self.pb
                    .set_message(format!("wave {wave}/{waves} ({size} items)"));
            }
            ProgressEvent::ItemCompleted { progress, result } => {
                self.pb.set_position(progress.processed as u64);
                self.pb.set_message(format!(
                    "ok {} · failed {} · ~{}s left",
                    progress.succeeded, progress.failed, progress.estimated_seconds_remaining
                ));
                if let Outcome::Error { kind, .. } = &result.outcome {
                    self.pb.println(format!(
                        "  {} {} {kind}",
                        self.red.apply_to("✗"),
                        result.source
                    ));
                }
            }
            ProgressEvent::Cooldown { delay } => {
                self.pb
                    .set_message(format!("cooling down {}ms", delay.as_millis()));
            }
            ProgressEvent::Finished {
                progress,
                cancelled,
            } => {
                self.pb.finish_and_clear();
                println!("{}", finish_line(progress, *cancelled, &self.green, &self.yellow));
            }
        }
    }
}

fn finish_line(progress: &RunProgress, cancelled: bool, green: &Style, yellow: &Style) -> String {
    if cancelled {
        format!(
            "  {} Run stopped after {}/{} items",
            yellow.apply_to("■"),
            progress.processed,
            progress.total
        )
    } else {
        format!(
            "  {} Processed {} items",
            green.apply_to("✓"),
            progress.processed
        )
    }
}

fn result_line(result: &RunResult, green: &Style, red: &Style) -> String {
    match &result.outcome {
        Outcome::Ok { output } => format!(
            "  {} {}: {}",
            green.apply_to("✓"),
            result.source,
            output.preview(PREVIEW_CHARS)
        ),
        Outcome::Error { kind, message } => format!(
            "  {} {}: {kind} {}",
            red.apply_to("✗"),
            result.source,
            message.lines().next().unwrap_or_default()
        ),
    }
}

/// Prints totals for a finished run and hints at `retry` when needed.
pub fn print_summary(summary: &RunSummary) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();

    for result in summary.results_most_recent_first().take(5) {
        println!("{}", result_line(result, &green, &red));
    }
    println!(
        "\n  {} {} succeeded, {} failed of {}",
        green.apply_to("Done:"),
        summary.succeeded,
        summary.failed,
        summary.total
    );
    if summary.failed > 0 {
        println!(
            "  {}",
            Style::new()
                .yellow()
                .apply_to("Run `framebatch retry` to reprocess the failed items.")
        );
    }
}

/// Prints the state file overview used by `status`.
pub fn print_status<'a>(
    workflow: &str,
    counts: StatusCounts,
    recent: impl Iterator<Item = &'a RunResult>,
) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let dim = Style::new().dim();

    println!("{}", dim.apply_to(format!("─── {workflow} ───")));
    println!(
        "  {} success · {} failed · {} pending",
        green.apply_to(counts.success),
        red.apply_to(counts.failed),
        counts.pending
    );
    for result in recent {
        println!("{}", result_line(result, &green, &red));
    }
}
