use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{
    ConfigCommand, DismissCommand, DrainCommand, InitCommand, ResetCommand, RetryCommand,
    StatusCommand,
};
use fieldsync::{Config, Engine};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(version)]
#[command(about = "Inspect and drain the offline sync queue", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the local database
    Init(InitCommand),

    /// Show queue counts and entries needing attention
    Status(StatusCommand),

    /// Push due queue entries to the server
    Drain(DrainCommand),

    /// Push one entry now, ignoring backoff
    Retry(RetryCommand),

    /// Drop an entry that needs attention
    Dismiss(DismissCommand),

    /// Delete all local data and recreate the database
    Reset(ResetCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Save config path for config init
    let cli_config_path = cli.config.clone();

    let mut config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config, cli_config_path),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    // Commands drive the queue themselves; `drain --watch` starts its own loop.
    config.sync.auto_drain = false;

    let engine = Engine::initialize(&config).await?;
    let result = execute_command(command, &engine, &config).await;
    engine.close().await;
    result
}

async fn execute_command(
    command: Commands,
    engine: &Engine,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Init(cmd) => cmd.run(engine, config).await?,
        Commands::Status(cmd) => cmd.run(engine).await?,
        Commands::Drain(cmd) => cmd.run(engine).await?,
        Commands::Retry(cmd) => cmd.run(engine).await?,
        Commands::Dismiss(cmd) => cmd.run(engine).await?,
        Commands::Reset(cmd) => cmd.run(engine).await?,
        Commands::Config(_) => {}
    }
    Ok(())
}
