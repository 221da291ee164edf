use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use fieldsync::config::{Config, DEFAULT_CONFIG_TEMPLATE};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'fieldsync config show' to view current configuration.");
                    return Ok(());
                }

                // Create parent directory
                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG_TEMPLATE.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!(
        "user_id: {}",
        config.user_id.value.as_deref().unwrap_or("(not set)")
    );
    println!("  source: {}", config.user_id.source);
    println!();

    let sync = &config.sync;
    println!("sync:");
    match &sync.server_url {
        Some(url) => println!("  server_url: {}", url),
        None => println!("  server_url: (not set)"),
    }
    match &sync.api_key {
        Some(key) => println!("  api_key: {}...", key.chars().take(8).collect::<String>()),
        None => println!("  api_key: (not set)"),
    }
    println!("  auto_drain: {}", sync.auto_drain);
    println!("  drain_interval_secs: {}", sync.drain_interval_secs);
    println!("  push_timeout_secs: {}", sync.push_timeout_secs);
    println!("  batch_size: {}", sync.batch_size);
    println!();

    let retry = &config.retry;
    println!("retry:");
    println!("  max_retries: {}", retry.max_retries);
    println!("  initial_delay_secs: {}", retry.initial_delay_secs);
    println!("  max_delay_secs: {}", retry.max_delay_secs);
    println!("  breaker_threshold: {}", retry.breaker_threshold);
    println!("  breaker_cooldown_secs: {}", retry.breaker_cooldown_secs);
    println!();

    println!("reset_on_corruption: {}", config.reset_on_corruption);
}
