use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "taskbridge",
    about = "Taskbridge executes file-based task commands against a task manager.",
    long_about = "Taskbridge watches a command directory for JSON command files, executes each one against the configured task-manager capabilities, writes a <id>_response.json file into the response directory, and deletes the command.\n\nCapability commands receive their input via TASKBRIDGE_* environment variables.",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Load configuration from PATH instead of ~/.config/taskbridge.yml.
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        value_name = "PATH",
        help = "Load configuration from PATH instead of ~/.config/taskbridge.yml."
    )]
    pub(crate) config: Option<PathBuf>,

    /// Process the commands currently queued, then exit.
    #[arg(
        long = "once",
        help = "Process the commands currently queued, then exit."
    )]
    pub(crate) once: bool,

    #[command(subcommand)]
    pub(crate) command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    #[command(about = "Check directories, the script interpreter and capability configuration.")]
    /// Check directories, the script interpreter and capability configuration.
    Doctor,
}
