use std::fs;
use std::path::Path;

use crate::capabilities::Capability;
use crate::config::Config;
use crate::logger::Logger;
use crate::shell::command_exists;
use crate::watcher::{quit, Quit};

fn check_writable_dir(path: &Path, label: &str) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|err| format!("{} {} cannot be created: {}", label, path.display(), err))?;
    if !path.is_dir() {
        return Err(format!("{} {} is not a directory", label, path.display()));
    }
    let scratch = tempfile::Builder::new()
        .prefix(".taskbridge-doctor-")
        .tempfile_in(path)
        .map_err(|err| format!("{} {} is not writable: {}", label, path.display(), err))?;
    scratch
        .close()
        .map_err(|err| format!("{} {} scratch file cleanup failed: {}", label, path.display(), err))
}

fn interpreter_program(interpreter: &str) -> &str {
    interpreter.split_whitespace().next().unwrap_or("")
}

fn check_interpreter(interpreter: &str) -> Result<(), String> {
    let program = interpreter_program(interpreter);
    let found = if program.contains('/') {
        Path::new(program).is_file()
    } else {
        command_exists(program)
    };
    if !found {
        return Err(format!(
            "sandbox.interpreter {} was not found on PATH",
            program
        ));
    }
    Ok(())
}

pub(crate) fn unconfigured_capabilities(config: &Config) -> Vec<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|capability| config.capabilities.command_for(*capability).is_none())
        .collect()
}

pub(crate) fn run_doctor_checks(config: &Config) -> Vec<String> {
    let mut failures = Vec::new();
    let dirs = [
        (config.command_dir.as_path(), "command_dir"),
        (config.response_dir.as_path(), "response_dir"),
    ];
    for (path, label) in dirs {
        if let Err(message) = check_writable_dir(path, label) {
            failures.push(message);
        }
    }
    if let Some(dead_letter_dir) = &config.dead_letter_dir {
        if let Err(message) = check_writable_dir(dead_letter_dir, "dead_letter_dir") {
            failures.push(message);
        }
    }
    if let Err(message) = check_interpreter(&config.sandbox.interpreter) {
        failures.push(message);
    }
    failures
}

pub(crate) fn run_doctor_mode(config: &Config, logger: &Logger) -> Result<(), Quit> {
    for capability in unconfigured_capabilities(config) {
        eprintln!(
            "Warning: capabilities.{} is not configured; {} commands will fail.",
            capability.config_key(),
            capability
        );
    }

    let failures = run_doctor_checks(config);
    if failures.is_empty() {
        logger.log_event("doctor", &[("status", "ok")]);
        println!("doctor: ok");
        return Ok(());
    }
    for message in &failures {
        eprintln!("{}", message);
    }
    Err(quit(logger, &failures.join("; "), 1))
}
