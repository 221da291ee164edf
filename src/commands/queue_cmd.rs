//! Queue inspection and drain commands.

use clap::Args;
use serde::Serialize;

use super::OutputFormat;
use fieldsync::sync::{BreakerState, DrainReport, EntryOutcome, QueueEntry, QueueStats};
use fieldsync::{Engine, EntityType};

/// Show queue counts and entries needing attention
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct StatusReport {
    database_path: String,
    schema_version: String,
    sync_configured: bool,
    breaker: Option<String>,
    queue: QueueStats,
    needing_attention: Vec<QueueEntry>,
}

fn describe_breaker(state: BreakerState) -> String {
    match state {
        BreakerState::Closed => "closed".to_string(),
        BreakerState::Open { until } => format!("open until {}", until.to_rfc3339()),
        BreakerState::HalfOpen => "half-open".to_string(),
    }
}

impl StatusCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let report = StatusReport {
            database_path: engine.store().path().display().to_string(),
            schema_version: engine.schema_version().await?.to_string(),
            sync_configured: engine.is_sync_configured(),
            breaker: engine.breaker_state().map(describe_breaker),
            queue: engine.stats().await?,
            needing_attention: engine.needing_attention().await?,
        };

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => print_status(&report),
        }
        Ok(())
    }
}

fn print_status(report: &StatusReport) {
    println!("Database: {} (schema {})", report.database_path, report.schema_version);
    println!(
        "Sync:     {}",
        if report.sync_configured {
            "configured"
        } else {
            "not configured"
        }
    );
    if let Some(breaker) = &report.breaker {
        println!("Circuit:  {}", breaker);
    }
    println!();

    println!("Queue");
    println!("  pending:         {}", report.queue.pending);
    println!("  needs attention: {}", report.queue.needs_attention);
    println!("  rejected:        {}", report.queue.rejected);

    if report.needing_attention.is_empty() {
        return;
    }

    println!();
    println!("Needs attention:");
    for entry in &report.needing_attention {
        println!(
            "  {} {} [{}] retries: {}",
            entry.entity_type, entry.entity_id, entry.status, entry.retry_count
        );
        if let Some(error) = &entry.error_message {
            println!("    {}", error);
        }
    }
    println!();
    println!("Use 'fieldsync retry <type> <id>' to push again or 'fieldsync dismiss <type> <id>' to drop.");
}

/// Push due queue entries to the server
#[derive(Args)]
pub struct DrainCommand {
    /// Keep draining in the background until Ctrl-C
    #[arg(long)]
    pub watch: bool,
}

impl DrainCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        if self.watch {
            let handle = engine.spawn_background()?;
            println!("Draining in the background. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
            println!("Stopped. {} entries outstanding.", engine.pending_count().await?);
            return Ok(());
        }

        let report = engine.drain_once().await?;
        print_drain(&report);
        println!("{} entries outstanding.", engine.pending_count().await?);
        Ok(())
    }
}

fn print_drain(report: &DrainReport) {
    if report.is_empty() {
        println!("Nothing due.");
        return;
    }

    println!("✓ synced:          {}", report.synced);
    if report.superseded > 0 {
        println!("  edited, resend:  {}", report.superseded);
    }
    if report.retrying > 0 {
        println!("  will retry:      {}", report.retrying);
    }
    if report.needs_attention > 0 {
        println!("✗ needs attention: {}", report.needs_attention);
    }
    if report.rejected > 0 {
        println!("✗ rejected:        {}", report.rejected);
    }
    if report.orphaned > 0 {
        println!("  dropped:         {} (source deleted)", report.orphaned);
    }
    if report.deferred > 0 {
        println!("  deferred:        {} (server unreachable)", report.deferred);
    }
    if report.errors > 0 {
        println!("✗ errors:          {} (see log)", report.errors);
    }
}

/// Push one entry now, ignoring backoff
#[derive(Args)]
pub struct RetryCommand {
    /// Entity type (e.g., time-record, photo)
    entity_type: EntityType,

    /// Local id of the entity
    entity_id: String,
}

impl RetryCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        match engine.retry_now(self.entity_type, &self.entity_id).await? {
            EntryOutcome::Synced { remote_id } => {
                println!(
                    "✓ {} {} synced (remote id {})",
                    self.entity_type, self.entity_id, remote_id
                );
            }
            EntryOutcome::Superseded { remote_id } => {
                println!(
                    "{} {} was edited during the push (remote id {}); still queued",
                    self.entity_type, self.entity_id, remote_id
                );
            }
            EntryOutcome::Orphaned => {
                println!(
                    "{} {} no longer exists; queue entry dropped",
                    self.entity_type, self.entity_id
                );
            }
            outcome => println!("{:?}", outcome),
        }
        Ok(())
    }
}

/// Drop an entry that needs attention
#[derive(Args)]
pub struct DismissCommand {
    /// Entity type (e.g., time-record, photo)
    entity_type: EntityType,

    /// Local id of the entity
    entity_id: String,
}

impl DismissCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        if engine.dismiss(self.entity_type, &self.entity_id).await? {
            println!("Dismissed {} {}", self.entity_type, self.entity_id);
        } else {
            println!(
                "No dismissable entry for {} {} (only entries needing attention or rejected can be dismissed)",
                self.entity_type, self.entity_id
            );
        }
        Ok(())
    }
}
