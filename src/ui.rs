//! Terminal output for batch runs: spinner while a job is in flight,
//! colored outcome lines and a formatted summary.
//!
//! Uses `indicatif` for the spinner and `console` for styling.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::job::{Job, JobStatus, JobSummary};
use crate::store::QueueEntry;

/// Visual progress indicator for one batch job.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    /// Start the spinner with a description of the batch.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(description.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finish the spinner and print the job outcome line.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Completed => {
                println!(
                    "  {} Job {} completed: {} auto-resolved, {} for review, {} failed",
                    self.green.apply_to("✓"),
                    job.id,
                    job.metrics.completed,
                    self.yellow.apply_to(job.metrics.manual_review),
                    job.metrics.failed,
                );
            }
            JobStatus::Failed => {
                println!(
                    "  {} Job {} failed: {}",
                    self.red.apply_to("✗"),
                    job.id,
                    job.error.as_deref().unwrap_or("unknown error"),
                );
            }
            JobStatus::Running => {
                println!("  {} Job {} still running", self.yellow.apply_to("…"), job.id);
            }
        }
    }

    /// Print the job summary as formatted JSON.
    pub fn print_summary(&self, summary: &JobSummary) {
        let style = match summary.status {
            JobStatus::Completed => &self.green,
            JobStatus::Failed => &self.red,
            JobStatus::Running => &self.yellow,
        };
        println!();
        println!("{}", style.apply_to("─── Job Summary ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
    }
}

/// Print queue entries in dequeue order, most urgent first.
pub fn print_queue(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("Review queue is empty.");
        return;
    }
    println!("{} record(s) awaiting review:", entries.len());
    println!(
        "{}",
        serde_json::to_string_pretty(entries).unwrap_or_default()
    );
}
