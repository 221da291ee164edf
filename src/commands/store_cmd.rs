use clap::Args;

use fieldsync::{Config, Engine};

/// Create or migrate the local database
#[derive(Debug, Args)]
pub struct InitCommand {}

impl InitCommand {
    pub async fn run(&self, engine: &Engine, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let version = engine.schema_version().await?;
        let healthy = engine.check_integrity().await?;

        println!("Database: {}", engine.store().path().display());
        println!("Schema:   {}", version);
        println!("Integrity: {}", if healthy { "ok" } else { "FAILED" });
        if !config.sync.is_configured() {
            println!();
            println!("Sync is not configured. Run 'fieldsync config init' and set");
            println!("sync.server_url and sync.api_key, or set FIELDSYNC_SYNC_URL and");
            println!("FIELDSYNC_SYNC_API_KEY.");
        }
        Ok(())
    }
}

/// Delete all local data and recreate the database
#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Confirm that unsynced data may be lost
    #[arg(long)]
    yes: bool,
}

impl ResetCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let pending = engine.pending_count().await?;
        if !self.yes {
            println!(
                "This deletes every local record, including {} unsynced queue entr{}.",
                pending,
                if pending == 1 { "y" } else { "ies" }
            );
            println!("Run again with --yes to continue.");
            return Ok(());
        }

        let version = engine.reset().await?;
        println!("Database reset (schema {}).", version);
        Ok(())
    }
}
