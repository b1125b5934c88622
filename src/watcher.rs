use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{file_stem, parse_command, salvage_response_id, CommandFile, Response};
use crate::dispatch::ActionDispatcher;
use crate::error::BridgeError;
use crate::logger::{sanitize_log_value, Logger};
use crate::response::{AckManager, AckOutcome, ResponseWriter};

const INTERRUPT_POLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub(crate) struct Quit {
    pub(crate) code: i32,
    #[allow(dead_code)]
    pub(crate) reason: String,
}

impl Quit {
    pub(crate) fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code as u8)
    }
}

pub(crate) fn quit(logger: &Logger, reason: &str, code: i32) -> Quit {
    let sanitized = if reason.trim().is_empty() {
        "unknown".to_string()
    } else {
        sanitize_log_value(reason)
    };
    logger.log_transition(&format!("quit reason={}", sanitized));
    Quit {
        code,
        reason: reason.to_string(),
    }
}

/// Where a command file ended up after one processing attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FileOutcome {
    /// Response written with `success: true`, source deleted.
    Succeeded,
    /// Response written with `success: false`, source deleted.
    Failed,
    /// The file disappeared before it could be read; nothing was written.
    Vanished,
    /// The response could not be written or the source could not be deleted;
    /// the file stays in the queue and is picked up again next pass.
    Retained,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PassSummary {
    pub(crate) discovered: usize,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) vanished: usize,
    pub(crate) retained: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Succeeded => self.succeeded += 1,
            FileOutcome::Failed => self.failed += 1,
            FileOutcome::Vanished => self.vanished += 1,
            FileOutcome::Retained => self.retained += 1,
        }
    }
}

pub(crate) struct Watcher<'a> {
    pub(crate) command_dir: PathBuf,
    pub(crate) dispatcher: ActionDispatcher<'a>,
    pub(crate) responses: ResponseWriter,
    pub(crate) acks: AckManager,
    pub(crate) logger: &'a Logger,
    pub(crate) poll_interval: Duration,
    pub(crate) max_in_flight: usize,
    pub(crate) interrupt_flag: Arc<AtomicBool>,
}

impl Watcher<'_> {
    /// Current command files, sorted by name. Hidden files and anything not
    /// ending in `.json` are ignored, which leaves producers free to stage
    /// writes under a temporary name.
    pub(crate) fn discover(&self) -> Result<Vec<PathBuf>, String> {
        let entries = fs::read_dir(&self.command_dir).map_err(|err| {
            format!(
                "Failed to read command directory {}: {}",
                self.command_dir.display(),
                err
            )
        })?;
        let mut paths = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
                continue;
            }
            paths.push(self.command_dir.join(entry.file_name()));
        }
        paths.sort();
        Ok(paths)
    }

    pub(crate) fn scan_once(&self) -> PassSummary {
        let mut summary = PassSummary::default();
        let paths = match self.discover() {
            Ok(paths) => paths,
            Err(err) => {
                eprintln!("{}", err);
                self.logger.log_event("scan_failed", &[("error", &err)]);
                return summary;
            }
        };
        summary.discovered = paths.len();

        for batch in paths.chunks(self.max_in_flight.max(1)) {
            let outcomes: Vec<FileOutcome> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|path| scope.spawn(move || self.process_file(path)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or(FileOutcome::Retained))
                    .collect()
            });
            for outcome in &outcomes {
                summary.record(outcome);
            }
        }
        summary
    }

    /// Drives one file through parse, dispatch, response write and acknowledgement.
    pub(crate) fn process_file(&self, path: &Path) -> FileOutcome {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.logger.log_event("discovered", &[("file", &filename)]);

        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.logger.log_event("vanished", &[("file", &filename)]);
                return FileOutcome::Vanished;
            }
            Err(err) => {
                let failure =
                    BridgeError::MalformedCommand(format!("unreadable command file: {err}"));
                return self.finish(path, &filename, &file_stem(&filename), Err(failure));
            }
        };

        let text = std::str::from_utf8(&raw);
        let parsed = text
            .map_err(|err| BridgeError::MalformedCommand(format!("command is not UTF-8: {err}")))
            .and_then(parse_command);
        let command = match parsed {
            Ok(command) => command,
            Err(err) => {
                self.store_dead_letter(&filename, &raw);
                let response_id = text
                    .ok()
                    .and_then(salvage_response_id)
                    .unwrap_or_else(|| file_stem(&filename));
                return self.finish(path, &filename, &response_id, Err(err));
            }
        };

        let file = CommandFile {
            filename: filename.clone(),
            path: path.to_path_buf(),
            command,
        };
        let response_id = file.response_id();
        self.logger.log_event(
            "parsed",
            &[
                ("file", &filename),
                ("action", &file.command.action),
                ("id", &response_id),
            ],
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatcher.dispatch(&file.command)
        }))
        .unwrap_or_else(|payload| Err(BridgeError::HandlerPanicked(panic_message(&*payload))));
        self.finish(&file.path, &filename, &response_id, outcome)
    }

    fn finish(
        &self,
        path: &Path,
        filename: &str,
        response_id: &str,
        outcome: Result<serde_json::Value, BridgeError>,
    ) -> FileOutcome {
        if let Err(err) = &outcome {
            self.logger.log_event(
                "command_failed",
                &[
                    ("file", filename),
                    ("id", response_id),
                    ("kind", err.kind()),
                    ("error", &err.to_string()),
                ],
            );
        }
        let response = Response::from(outcome);
        let success = response.success;

        let written = match self.responses.write_response(response_id, &response) {
            Ok(written) => written,
            Err(err) => {
                eprintln!("{}", err);
                self.logger.log_event(
                    "response_write_failed",
                    &[("file", filename), ("error", &err)],
                );
                return FileOutcome::Retained;
            }
        };
        self.logger.log_event(
            "response_written",
            &[("file", filename), ("response", &written.display().to_string())],
        );

        match self.acks.delete_command_file(path) {
            Ok(AckOutcome::Deleted) => {
                self.logger.log_event("acknowledged", &[("file", filename)]);
            }
            Ok(AckOutcome::AlreadyGone) => {
                self.logger
                    .log_event("acknowledged", &[("file", filename), ("note", "already_gone")]);
            }
            Err(err) => {
                eprintln!("{}", err);
                self.logger
                    .log_event("ack_failed", &[("file", filename), ("error", &err)]);
                return FileOutcome::Retained;
            }
        }

        if success {
            FileOutcome::Succeeded
        } else {
            FileOutcome::Failed
        }
    }

    fn store_dead_letter(&self, filename: &str, raw: &[u8]) {
        match self.acks.dead_letter(filename, raw) {
            Ok(Some(stored)) => self.logger.log_event(
                "dead_lettered",
                &[("file", filename), ("copy", &stored.display().to_string())],
            ),
            Ok(None) => {}
            Err(err) => {
                eprintln!("{}", err);
                self.logger
                    .log_event("dead_letter_failed", &[("file", filename), ("error", &err)]);
            }
        }
    }

    fn check_interrupted(&self) -> Result<(), Quit> {
        if self.interrupt_flag.load(Ordering::SeqCst) {
            return Err(quit(self.logger, "interrupted", 130));
        }
        Ok(())
    }

    fn sleep_until_next_pass(&self) -> Result<(), Quit> {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            self.check_interrupted()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(INTERRUPT_POLL_STEP.min(deadline - now));
        }
    }

    /// Scans until interrupted. Individual command failures never end the loop.
    pub(crate) fn run(&self) -> Result<(), Quit> {
        self.logger.log_event(
            "watch_start",
            &[("command_dir", &self.command_dir.display().to_string())],
        );
        loop {
            self.check_interrupted()?;
            let summary = self.scan_once();
            if summary.discovered > 0 {
                self.logger.log_transition(&format!(
                    "pass discovered={} succeeded={} failed={} vanished={} retained={}",
                    summary.discovered,
                    summary.succeeded,
                    summary.failed,
                    summary.vanished,
                    summary.retained
                ));
            }
            self.sleep_until_next_pass()?;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
