use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capabilities::Capability;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_INTERPRETER: &str = "node";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) command_dir: PathBuf,
    pub(crate) response_dir: PathBuf,
    pub(crate) log_path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub(crate) poll_interval_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub(crate) max_in_flight: usize,
    #[serde(default)]
    pub(crate) dead_letter_dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) sandbox: SandboxConfig,
    #[serde(default)]
    pub(crate) capabilities: CapabilityCommands,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SandboxConfig {
    #[serde(default = "default_interpreter")]
    pub(crate) interpreter: String,
    #[serde(default = "default_timeout_ms")]
    pub(crate) timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SandboxConfig {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Shell command per capability. Unset capabilities fail when invoked.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CapabilityCommands {
    #[serde(default = "default_timeout_ms")]
    pub(crate) timeout_ms: u64,
    #[serde(default)]
    pub(crate) add_task: Option<String>,
    #[serde(default)]
    pub(crate) get_tasks: Option<String>,
    #[serde(default)]
    pub(crate) update_task: Option<String>,
    #[serde(default)]
    pub(crate) get_all_projects: Option<String>,
    #[serde(default)]
    pub(crate) add_project: Option<String>,
    #[serde(default)]
    pub(crate) get_all_tags: Option<String>,
    #[serde(default)]
    pub(crate) add_tag: Option<String>,
    #[serde(default)]
    pub(crate) update_tag: Option<String>,
    #[serde(default)]
    pub(crate) delete_tag: Option<String>,
    #[serde(default)]
    pub(crate) show_snack: Option<String>,
    #[serde(default)]
    pub(crate) dispatch_action: Option<String>,
}

impl Default for CapabilityCommands {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            add_task: None,
            get_tasks: None,
            update_task: None,
            get_all_projects: None,
            add_project: None,
            get_all_tags: None,
            add_tag: None,
            update_tag: None,
            delete_tag: None,
            show_snack: None,
            dispatch_action: None,
        }
    }
}

impl CapabilityCommands {
    pub(crate) fn command_for(&self, capability: Capability) -> Option<&str> {
        let command = match capability {
            Capability::AddTask => &self.add_task,
            Capability::GetTasks => &self.get_tasks,
            Capability::UpdateTask => &self.update_task,
            Capability::GetAllProjects => &self.get_all_projects,
            Capability::AddProject => &self.add_project,
            Capability::GetAllTags => &self.get_all_tags,
            Capability::AddTag => &self.add_tag,
            Capability::UpdateTag => &self.update_tag,
            Capability::DeleteTag => &self.delete_tag,
            Capability::ShowSnack => &self.show_snack,
            Capability::DispatchAction => &self.dispatch_action,
        };
        command.as_deref().filter(|value| !value.trim().is_empty())
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}

#[derive(Debug)]
pub(crate) struct LoadedConfig {
    pub(crate) config: Config,
    pub(crate) warnings: Vec<String>,
}

const ALLOWED_TOP_LEVEL_KEYS: [&str; 8] = [
    "command_dir",
    "response_dir",
    "log_path",
    "poll_interval_ms",
    "max_in_flight",
    "dead_letter_dir",
    "sandbox",
    "capabilities",
];

pub(crate) fn load_config(path: &Path, home: Option<&Path>) -> Result<LoadedConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {}", path.display(), err))?;
    load_config_from_str(&path.display().to_string(), &content, home)
}

pub(crate) fn load_config_from_str(
    label: &str,
    content: &str,
    home: Option<&Path>,
) -> Result<LoadedConfig, String> {
    let value: Value = serde_yaml::from_str(content)
        .map_err(|err| format!("Failed to parse config {}: {}", label, err))?;
    let mut mapping = match value {
        Value::Mapping(mapping) => mapping,
        _ => return Err(format!("Config {} must be a YAML mapping", label)),
    };

    let warnings = unknown_top_level_keys(&mapping);
    emit_unknown_key_warnings(&warnings);
    for key in &warnings {
        mapping.remove(Value::String(key.clone()));
    }
    validate_required_fields(&mapping)?;

    let mut config: Config = serde_path_to_error::deserialize(Value::Mapping(mapping))
        .map_err(|err| {
            format!(
                "Failed to parse config {} at {}: {}",
                label,
                err.path(),
                err.inner()
            )
        })?;
    config.expand_home(home);
    validate_config(&config)?;

    Ok(LoadedConfig { config, warnings })
}

impl Config {
    fn expand_home(&mut self, home: Option<&Path>) {
        let Some(home) = home else {
            return;
        };
        self.command_dir = expand_home_path(&self.command_dir, home);
        self.response_dir = expand_home_path(&self.response_dir, home);
        self.log_path = expand_home_path(&self.log_path, home);
        self.dead_letter_dir = self
            .dead_letter_dir
            .as_deref()
            .map(|p| expand_home_path(p, home));
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn expand_home_path(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

pub(crate) fn validate_config(config: &Config) -> Result<(), String> {
    if config.command_dir == config.response_dir {
        return Err("command_dir and response_dir must be different directories.".to_string());
    }
    if config.poll_interval_ms < 1 {
        return Err("poll_interval_ms must be a positive integer (got 0).".to_string());
    }
    if config.max_in_flight < 1 {
        return Err("max_in_flight must be a positive integer (got 0).".to_string());
    }
    if config.sandbox.interpreter.trim().is_empty() {
        return Err("sandbox.interpreter must not be empty.".to_string());
    }
    if config.sandbox.timeout_ms < 1 {
        return Err("sandbox.timeout_ms must be a positive integer (got 0).".to_string());
    }
    if config.capabilities.timeout_ms < 1 {
        return Err("capabilities.timeout_ms must be a positive integer (got 0).".to_string());
    }
    Ok(())
}

fn emit_unknown_key_warnings(keys: &[String]) {
    for key in keys {
        eprintln!("Warning: unknown config key: {}", key);
    }
}

fn unknown_top_level_keys(mapping: &Mapping) -> Vec<String> {
    mapping
        .keys()
        .filter_map(|key| key.as_str().map(|value| value.to_string()))
        .filter(|key| !ALLOWED_TOP_LEVEL_KEYS.contains(&key.as_str()))
        .collect()
}

fn validate_required_fields(mapping: &Mapping) -> Result<(), String> {
    require_non_empty_string(mapping, "command_dir", "command_dir")?;
    require_non_empty_string(mapping, "response_dir", "response_dir")?;
    require_non_empty_string(mapping, "log_path", "log_path")?;
    Ok(())
}

fn require_non_empty_string(mapping: &Mapping, key_name: &str, label: &str) -> Result<(), String> {
    let key = Value::String(key_name.to_string());
    match mapping.get(&key) {
        None => Err(format!("Missing required config value: {}", label)),
        Some(Value::Null) => Err(format!("{} must not be null", label)),
        Some(Value::String(value)) => {
            if value.trim().is_empty() {
                Err(format!("{} must not be empty", label))
            } else {
                Ok(())
            }
        }
        Some(_) => Err(format!("{} must be a string", label)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    fn write_temp_config(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new().expect("create temp file");
        fs::write(file.path(), contents).expect("write temp config");
        file
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let file = write_temp_config("command_dir: /tmp/in\nresponse_dir: /tmp/out\nlog_path: /tmp/bridge.log\n");
        let loaded = load_config(file.path(), None).expect("config should load");
        let config = loaded.config;
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.sandbox.interpreter, "node");
        assert_eq!(config.sandbox.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.log_path, PathBuf::from("/tmp/bridge.log"));
        assert!(config.dead_letter_dir.is_none());
        assert!(config.capabilities.command_for(Capability::AddTask).is_none());
    }

    #[test]
    fn missing_directories_error_names_the_key() {
        let file = write_temp_config("response_dir: /tmp/out\nlog_path: /tmp/bridge.log\n");
        let err = load_config(file.path(), None).expect_err("expected missing command_dir");
        assert!(err.contains("command_dir"), "got: {err}");

        let file = write_temp_config("command_dir: /tmp/in\nresponse_dir: null\nlog_path: /tmp/bridge.log\n");
        let err = load_config(file.path(), None).expect_err("expected null response_dir");
        assert!(err.contains("response_dir must not be null"), "got: {err}");

        let file = write_temp_config("command_dir: '  '\nresponse_dir: /tmp/out\nlog_path: /tmp/bridge.log\n");
        let err = load_config(file.path(), None).expect_err("expected empty command_dir");
        assert!(err.contains("command_dir must not be empty"), "got: {err}");
    }

    #[test]
    fn missing_log_path_is_rejected() {
        let file = write_temp_config("command_dir: /tmp/in\nresponse_dir: /tmp/out\n");
        let err = load_config(file.path(), None).expect_err("expected missing log_path");
        assert!(err.contains("log_path"), "got: {err}");
    }

    #[test]
    fn invalid_yaml_includes_path() {
        let file = write_temp_config("command_dir: [");
        let err = load_config(file.path(), None).expect_err("expected parse error");
        let path = file.path().display().to_string();
        assert!(err.contains(&path), "error should include path {path}, got: {err}");
    }

    #[test]
    fn unknown_keys_reported_and_ignored() {
        let file = write_temp_config(
            "command_dir: /tmp/in\nresponse_dir: /tmp/out\nlog_path: /tmp/bridge.log\nextra_key: true\n",
        );
        let loaded = load_config(file.path(), None).expect("config should load");
        assert_eq!(loaded.warnings, vec!["extra_key".to_string()]);
    }

    #[test]
    fn nested_type_errors_name_the_key_path() {
        let file = write_temp_config(
            "command_dir: /tmp/in\nresponse_dir: /tmp/out\nlog_path: /tmp/bridge.log\nsandbox:\n  timeout_ms: soon\n",
        );
        let err = load_config(file.path(), None).expect_err("expected type error");
        assert!(err.contains("sandbox.timeout_ms"), "got: {err}");
    }

    #[test]
    fn same_directory_for_commands_and_responses_is_rejected() {
        let file = write_temp_config("command_dir: /tmp/q\nresponse_dir: /tmp/q\nlog_path: /tmp/bridge.log\n");
        let err = load_config(file.path(), None).expect_err("expected same-dir error");
        assert!(err.contains("must be different"), "got: {err}");
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let file = write_temp_config(
            "command_dir: /tmp/in\nresponse_dir: /tmp/out\nlog_path: /tmp/bridge.log\nmax_in_flight: 0\n",
        );
        let err = load_config(file.path(), None).expect_err("expected bound error");
        assert!(err.contains("max_in_flight"), "got: {err}");
    }

    #[test]
    fn home_prefix_is_expanded() {
        let file = write_temp_config(
            "command_dir: ~/sp/plugin_commands\nresponse_dir: ~/sp/plugin_responses\nlog_path: ~/bridge.log\n",
        );
        let loaded =
            load_config(file.path(), Some(Path::new("/home/tester"))).expect("config should load");
        assert_eq!(
            loaded.config.command_dir,
            PathBuf::from("/home/tester/sp/plugin_commands")
        );
        assert_eq!(
            loaded.config.log_path,
            PathBuf::from("/home/tester/bridge.log")
        );
    }

    #[test]
    fn capability_commands_are_looked_up_and_blank_ones_ignored() {
        let file = write_temp_config(
            "command_dir: /tmp/in\nresponse_dir: /tmp/out\nlog_path: /tmp/bridge.log\ncapabilities:\n  add_task: sp add-task\n  delete_tag: ''\n",
        );
        let loaded = load_config(file.path(), None).expect("config should load");
        let commands = &loaded.config.capabilities;
        assert_eq!(commands.command_for(Capability::AddTask), Some("sp add-task"));
        assert_eq!(commands.command_for(Capability::DeleteTag), None);
    }
}
