use clap::Parser;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capabilities::ShellCapabilities;
use crate::cli::{Cli, CliCommand};
use crate::config::{load_config, Config};
use crate::dispatch::ActionDispatcher;
use crate::doctor::run_doctor_mode;
use crate::logger::Logger;
use crate::response::{AckManager, ResponseWriter};
use crate::sandbox::ScriptSandbox;
use crate::watcher::{quit, Quit, Watcher};

const DEFAULT_CONFIG_REL: &str = ".config/taskbridge.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppMode {
    Watch,
    Once,
    Doctor,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn resolve_config_path(flag: Option<PathBuf>, home: Option<&Path>) -> Result<PathBuf, String> {
    if let Some(path) = flag {
        return Ok(path);
    }
    home.map(|home| home.join(DEFAULT_CONFIG_REL))
        .ok_or_else(|| "Missing HOME environment variable; pass --config PATH".to_string())
}

fn ensure_dirs(config: &Config) -> Result<(), String> {
    let log_parent = config
        .log_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty());
    let dirs = [
        Some(config.command_dir.as_path()),
        Some(config.response_dir.as_path()),
        config.dead_letter_dir.as_deref(),
        log_parent,
    ];
    for dir in dirs.into_iter().flatten() {
        fs::create_dir_all(dir)
            .map_err(|err| format!("Failed to create directory {}: {}", dir.display(), err))?;
    }
    Ok(())
}

fn install_interrupt_handler() -> Arc<AtomicBool> {
    let interrupt_flag = Arc::new(AtomicBool::new(false));
    if let Err(err) = ctrlc::set_handler({
        let interrupt_flag = Arc::clone(&interrupt_flag);
        move || {
            interrupt_flag.store(true, Ordering::SeqCst);
        }
    }) {
        eprintln!("Failed to set interrupt handler: {}", err);
    }
    interrupt_flag
}

pub(crate) fn run_with_cli(cli: Cli) -> Result<(), Quit> {
    let mode = match (cli.command, cli.once) {
        (Some(CliCommand::Doctor), _) => AppMode::Doctor,
        (None, true) => AppMode::Once,
        (None, false) => AppMode::Watch,
    };

    let home = home_dir();
    let config_path = resolve_config_path(cli.config, home.as_deref()).map_err(|message| {
        eprintln!("{}", message);
        Quit {
            code: 1,
            reason: message,
        }
    })?;
    if !config_path.is_file() {
        eprintln!("Missing config file: {}", config_path.display());
        return Err(Quit {
            code: 1,
            reason: format!("missing_config:{}", config_path.display()),
        });
    }

    let loaded = load_config(&config_path, home.as_deref()).map_err(|message| {
        eprintln!("{}", message);
        Quit {
            code: 1,
            reason: message,
        }
    })?;
    let config = loaded.config;
    let logger = Logger::new(Some(config.log_path.clone()));

    if mode == AppMode::Doctor {
        return run_doctor_mode(&config, &logger);
    }

    if let Err(message) = ensure_dirs(&config) {
        eprintln!("{}", message);
        return Err(quit(&logger, &message, 1));
    }

    let interrupt_flag = install_interrupt_handler();
    let capabilities = ShellCapabilities::new(&config.capabilities, &logger);
    let sandbox = ScriptSandbox::new(config.sandbox.interpreter.clone(), config.sandbox.timeout());
    let watcher = Watcher {
        command_dir: config.command_dir.clone(),
        dispatcher: ActionDispatcher::new(&capabilities, &sandbox, &logger),
        responses: ResponseWriter::new(&config.response_dir),
        acks: AckManager::new(&config.command_dir, config.dead_letter_dir.clone()),
        logger: &logger,
        poll_interval: config.poll_interval(),
        max_in_flight: config.max_in_flight,
        interrupt_flag,
    };

    match mode {
        AppMode::Once => {
            let summary = watcher.scan_once();
            println!(
                "processed {} command(s): {} succeeded, {} failed, {} retained",
                summary.discovered - summary.vanished,
                summary.succeeded,
                summary.failed,
                summary.retained
            );
            Ok(())
        }
        AppMode::Watch => watcher.run(),
        AppMode::Doctor => Ok(()),
    }
}

pub(crate) fn run_with_args(args: Vec<OsString>) -> Result<(), Quit> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // clap's `Error::print()` can bypass test output capturing.
            eprintln!("{err}");
            return Err(Quit {
                code: err.exit_code(),
                reason: "cli_parse".to_string(),
            });
        }
    };
    run_with_cli(cli)
}

pub(crate) fn main_with_args(args: Vec<OsString>) -> ExitCode {
    match run_with_args(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(quit) => quit.exit_code(),
    }
}

pub(crate) fn main() -> ExitCode {
    main_with_args(env::args_os().collect())
}
