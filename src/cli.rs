//! Command-line interface based on clap.
//!
//! Defines the [`Cli`] struct with subcommands [`Command`] (run, queue,
//! demo) and global flags (--workers, --max-attempts, --verbose).

use clap::{Parser, Subcommand};

/// provflow — healthcare provider record orchestrator.
#[derive(Debug, Parser)]
#[command(name = "provflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of concurrent stage workers.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Maximum attempts per stage before diverting to manual review.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process a batch of provider records from a JSON file.
    Run {
        /// Path to a JSON file with an array of provider records.
        file: String,
    },

    /// Show records awaiting manual review.
    Queue {
        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Run the built-in demonstration batch.
    Demo,
}
