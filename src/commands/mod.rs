mod config_cmd;
mod queue_cmd;
mod store_cmd;

pub use config_cmd::ConfigCommand;
pub use queue_cmd::{DismissCommand, DrainCommand, RetryCommand, StatusCommand};
pub use store_cmd::{InitCommand, ResetCommand};

use clap::ValueEnum;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
