use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use provflow::cli::{Cli, Command};
use provflow::config::OrchestratorConfig;
use provflow::notify::LogNotifier;
use provflow::orchestrator::{JobManager, RecordSeed};
use provflow::record::ProviderFields;
use provflow::stage::StageSet;
use provflow::store::MemoryStore;
use provflow::ui::{self, BatchProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = OrchestratorConfig::load()?;
    if let Some(workers) = cli.workers {
        config.pool.workers = workers;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts;
    }

    let store = Arc::new(MemoryStore::new());
    let manager = JobManager::new(
        store,
        StageSet::simulated(),
        Arc::new(LogNotifier),
        &config,
    );

    match cli.command {
        Command::Run { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read batch file {file}"))?;
            let seeds: Vec<RecordSeed> = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse batch file {file}"))?;
            run_batch(&manager, seeds).await?;
        }
        Command::Queue { limit } => {
            let pending = manager.queue().pending(limit).await?;
            ui::print_queue(&pending);
        }
        Command::Demo => {
            run_batch(&manager, demo_batch()).await?;
            let pending = manager.queue().pending(50).await?;
            ui::print_queue(&pending);
        }
    }

    Ok(())
}

async fn run_batch(manager: &JobManager, seeds: Vec<RecordSeed>) -> Result<()> {
    let count = seeds.len();
    let progress = BatchProgress::start(&format!("Processing {count} provider record(s)"));
    let job_id = manager.submit(seeds).await?;
    let job = manager.wait(job_id).await?;
    progress.complete(&job);
    progress.print_summary(&manager.summary(job_id).await?);
    Ok(())
}

/// Built-in batch exercising each routing outcome: a clean record, a
/// high-risk record and one that needs a human.
fn demo_batch() -> Vec<RecordSeed> {
    let mut clean = ProviderFields::default();
    clean.name = Some("Dr. Sarah Chen".into());
    clean.npi = Some("1457389620".into());
    clean.phone = Some("(415) 555-0132".into());
    clean.address = Some("450 Sutter St, San Francisco, CA".into());
    clean.specialty = Some("Cardiology".into());
    clean.state = Some("CA".into());
    clean.extra.insert("license_status".into(), "active".into());
    clean.extra.insert("license_state".into(), "CA".into());

    let mut risky = ProviderFields::default();
    risky.name = Some("Dr. Marcus Webb".into());
    risky.npi = Some("1982736450".into());
    risky.phone = Some("555-0177".into());
    risky.address = Some("88 Pine St, Seattle, WA".into());
    risky.specialty = Some("Orthopedics".into());
    risky.state = Some("WA".into());
    risky.extra.insert("license_status".into(), "inactive".into());
    risky.extra.insert("license_state".into(), "OR".into());

    let mut incomplete = ProviderFields::default();
    incomplete.name = Some("Dr. Amara Osei".into());
    incomplete.address = Some("12 Elm Ave, Boston, MA".into());
    incomplete.state = Some("ma".into());
    incomplete
        .extra
        .insert("license_status".into(), "active".into());

    vec![
        RecordSeed::new("P001", clean),
        RecordSeed::new("P002", risky),
        RecordSeed::new("P003", incomplete),
    ]
}
