use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Runs fleet tasks under time budgets")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the TOML configuration (default: ./taskbot.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Load a task manifest, run its command and report to the server.
    TaskRunner(TaskRunnerArgs),
    /// Print the bot version.
    Version,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TaskRunnerArgs {
    /// Base URL of the coordinating server; overrides `server.url`.
    #[arg(long, visible_alias = "swarming-server")]
    pub server: Option<String>,

    /// JSON manifest describing the task.
    #[arg(long, short = 'f')]
    pub file: PathBuf,

    #[arg(long, default_value_t = 0.0)]
    pub cost_usd_hour: f64,

    /// Time the task was accepted, in seconds since the UNIX epoch.
    /// Defaults to now.
    #[arg(long)]
    pub start: Option<f64>,

    /// Write a JSON summary of the final run to this file.
    #[arg(long)]
    pub json_file: Option<PathBuf>,
}
