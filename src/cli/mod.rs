use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "farmcast")]
#[command(about = "Weekly purchase probability and quantity forecasting", long_about = None)]
pub struct Cli {
    /// Path to the TOML config; a default one is written if missing
    #[arg(long, global = true, default_value = "config/config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Train, persist and write the submission (default)
    Run,
    /// Train and persist the ensemble only
    Train,
    /// Score the test set with a persisted ensemble
    Predict,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
