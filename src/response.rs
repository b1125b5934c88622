use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::command::Response;
use crate::sanitize::{confined_path, is_direct_child};

pub(crate) const RESPONSE_SUFFIX: &str = "_response.json";

#[derive(Debug, Clone)]
pub(crate) struct ResponseWriter {
    dir: PathBuf,
}

impl ResponseWriter {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn response_path(&self, id: &str) -> PathBuf {
        confined_path(&self.dir, id, RESPONSE_SUFFIX)
    }

    /// Writes `<sanitized id>_response.json` and returns its path once it is
    /// durably on disk. Readers never observe a partially written file: the
    /// JSON goes to a hidden temp file in the same directory, which is synced
    /// and then renamed into place.
    pub(crate) fn write_response(&self, id: &str, response: &Response) -> Result<PathBuf, String> {
        let target = self.response_path(id);
        let mut staged = tempfile::Builder::new()
            .prefix(".response-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|err| {
                format!(
                    "Failed to create response file in {}: {}",
                    self.dir.display(),
                    err
                )
            })?;
        write_json(&mut staged, response)
            .map_err(|err| format!("Failed to write response {}: {}", target.display(), err))?;
        staged
            .persist(&target)
            .map_err(|err| format!("Failed to persist response {}: {}", target.display(), err.error))?;
        Ok(target)
    }
}

fn write_json(file: &mut NamedTempFile, response: &Response) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *file, response)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    Deleted,
    AlreadyGone,
}

/// Removes processed command files, and only ever inside the command directory.
#[derive(Debug, Clone)]
pub(crate) struct AckManager {
    dir: PathBuf,
    dead_letter_dir: Option<PathBuf>,
}

impl AckManager {
    pub(crate) fn new(dir: impl Into<PathBuf>, dead_letter_dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            dead_letter_dir,
        }
    }

    pub(crate) fn delete_command_file(&self, path: &Path) -> Result<AckOutcome, String> {
        if !is_direct_child(&self.dir, path) {
            return Err(format!(
                "Refusing to delete {}: not inside {}",
                path.display(),
                self.dir.display()
            ));
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(AckOutcome::Deleted),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(AckOutcome::AlreadyGone),
            Err(err) => Err(format!("Failed to delete {}: {}", path.display(), err)),
        }
    }

    /// Keeps a copy of an unparseable payload when a dead-letter directory is configured.
    pub(crate) fn dead_letter(&self, filename: &str, raw: &[u8]) -> Result<Option<PathBuf>, String> {
        let Some(dir) = &self.dead_letter_dir else {
            return Ok(None);
        };
        fs::create_dir_all(dir)
            .map_err(|err| format!("Failed to create directory {}: {}", dir.display(), err))?;
        let target = confined_path(dir, filename, "");
        fs::write(&target, raw)
            .map_err(|err| format!("Failed to write {}: {}", target.display(), err))?;
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn traversal_ids_are_written_inside_the_response_dir() {
        let temp = TempDir::new().expect("temp dir");
        let responses = temp.path().join("mcp").join("plugin_responses");
        fs::create_dir_all(&responses).expect("create responses");
        let writer = ResponseWriter::new(&responses);

        let path = writer
            .write_response("../../evil_file", &Response::ok(json!({"secret": "data"})))
            .expect("write");

        assert_eq!(path, responses.join("evil_file_response.json"));
        assert!(path.is_file());
        assert!(!temp.path().join("mcp").join("evil_file_response.json").exists());
        assert!(!temp.path().join("evil_file_response.json").exists());
    }

    #[test]
    fn written_response_is_complete_json_and_no_temp_files_remain() {
        let temp = TempDir::new().expect("temp dir");
        let writer = ResponseWriter::new(temp.path());
        let response = Response::failure("unknown action: nope");
        let path = writer.write_response("cmd-1", &response).expect("write");

        let parsed: Response =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(parsed, response);
        let names: Vec<String> = fs::read_dir(temp.path())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cmd-1_response.json".to_string()]);
    }

    #[test]
    fn rewriting_the_same_id_replaces_the_response() {
        let temp = TempDir::new().expect("temp dir");
        let writer = ResponseWriter::new(temp.path());
        writer.write_response("dup", &Response::ok(json!(1))).expect("first");
        let path = writer.write_response("dup", &Response::ok(json!(2))).expect("second");
        let parsed: Response =
            serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse");
        assert_eq!(parsed.result, Some(json!(2)));
    }

    #[test]
    fn write_fails_cleanly_when_directory_is_missing() {
        let temp = TempDir::new().expect("temp dir");
        let writer = ResponseWriter::new(temp.path().join("missing"));
        let err = writer
            .write_response("x", &Response::ok(json!(null)))
            .expect_err("missing dir");
        assert!(err.contains("missing"), "got: {err}");
    }

    #[test]
    fn delete_is_refused_outside_the_command_dir() {
        let temp = TempDir::new().expect("temp dir");
        let commands = temp.path().join("commands");
        fs::create_dir_all(&commands).expect("create commands");
        let outside = temp.path().join("keep.json");
        fs::write(&outside, "{}").expect("write outside");

        let acks = AckManager::new(&commands, None);
        assert!(acks.delete_command_file(&outside).is_err());
        assert!(acks
            .delete_command_file(&commands.join("..").join("keep.json"))
            .is_err());
        assert!(outside.exists());
    }

    #[test]
    fn delete_reports_already_gone_files() {
        let temp = TempDir::new().expect("temp dir");
        let acks = AckManager::new(temp.path(), None);
        let path = temp.path().join("cmd.json");
        fs::write(&path, "{}").expect("write");
        assert_eq!(acks.delete_command_file(&path), Ok(AckOutcome::Deleted));
        assert_eq!(acks.delete_command_file(&path), Ok(AckOutcome::AlreadyGone));
    }

    #[test]
    fn dead_letter_copies_payload_only_when_configured() {
        let temp = TempDir::new().expect("temp dir");
        let acks = AckManager::new(temp.path().join("in"), None);
        assert_eq!(acks.dead_letter("bad.json", b"{oops"), Ok(None));

        let dead = temp.path().join("dead");
        let acks = AckManager::new(temp.path().join("in"), Some(dead.clone()));
        let stored = acks
            .dead_letter("../bad.json", b"{oops")
            .expect("dead letter")
            .expect("stored path");
        assert_eq!(stored, dead.join("bad.json"));
        assert_eq!(fs::read(&stored).expect("read"), b"{oops");
    }
}
