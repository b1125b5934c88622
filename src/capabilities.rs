use serde_json::{Map, Value};
use std::fmt;

use crate::config::CapabilityCommands;
use crate::logger::Logger;
use crate::shell::{decode_stdout, run_process, ProcessSpec};

pub(crate) type CapabilityResult = Result<Value, String>;

/// Operations the host task-management system exposes to the bridge.
///
/// Implementations report failures as plain messages; the dispatcher wraps them
/// into `BridgeError::Capability` with the capability name attached.
pub(crate) trait Capabilities: Send + Sync {
    fn add_task(&self, data: &Map<String, Value>) -> CapabilityResult;
    fn get_tasks(&self) -> CapabilityResult;
    fn update_task(&self, task_id: &str, data: &Map<String, Value>) -> CapabilityResult;
    fn get_all_projects(&self) -> CapabilityResult;
    fn add_project(&self, data: &Map<String, Value>) -> CapabilityResult;
    fn get_all_tags(&self) -> CapabilityResult;
    fn add_tag(&self, data: &Map<String, Value>) -> CapabilityResult;
    fn update_tag(&self, tag_id: &str, data: &Map<String, Value>) -> CapabilityResult;
    fn delete_tag(&self, tag_id: &str) -> CapabilityResult;
    fn show_snack(&self, message: &str) -> CapabilityResult;
    /// Forwards a generic `{type, ...payload}` action to the host's action bus.
    fn dispatch_action(&self, action: &Value) -> CapabilityResult;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Capability {
    AddTask,
    GetTasks,
    UpdateTask,
    GetAllProjects,
    AddProject,
    GetAllTags,
    AddTag,
    UpdateTag,
    DeleteTag,
    ShowSnack,
    DispatchAction,
}

impl Capability {
    pub(crate) const ALL: [Capability; 11] = [
        Self::AddTask,
        Self::GetTasks,
        Self::UpdateTask,
        Self::GetAllProjects,
        Self::AddProject,
        Self::GetAllTags,
        Self::AddTag,
        Self::UpdateTag,
        Self::DeleteTag,
        Self::ShowSnack,
        Self::DispatchAction,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::AddTask => "addTask",
            Self::GetTasks => "getTasks",
            Self::UpdateTask => "updateTask",
            Self::GetAllProjects => "getAllProjects",
            Self::AddProject => "addProject",
            Self::GetAllTags => "getAllTags",
            Self::AddTag => "addTag",
            Self::UpdateTag => "updateTag",
            Self::DeleteTag => "deleteTag",
            Self::ShowSnack => "showSnack",
            Self::DispatchAction => "dispatchAction",
        }
    }

    /// Key of the capability's command under `capabilities:` in the config.
    pub(crate) fn config_key(self) -> &'static str {
        match self {
            Self::AddTask => "add_task",
            Self::GetTasks => "get_tasks",
            Self::UpdateTask => "update_task",
            Self::GetAllProjects => "get_all_projects",
            Self::AddProject => "add_project",
            Self::GetAllTags => "get_all_tags",
            Self::AddTag => "add_tag",
            Self::UpdateTag => "update_tag",
            Self::DeleteTag => "delete_tag",
            Self::ShowSnack => "show_snack",
            Self::DispatchAction => "dispatch_action",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment handed to a capability command.
#[derive(Debug, Clone)]
pub(crate) struct CapabilityEnv {
    pub(crate) capability: Capability,
    pub(crate) entity_id: Option<String>,
    pub(crate) payload: Option<String>,
}

impl CapabilityEnv {
    pub(crate) fn apply(&self, spec: ProcessSpec) -> ProcessSpec {
        let spec = spec.with_env("TASKBRIDGE_CAPABILITY", self.capability.as_str());
        let spec = Self::apply_optional(spec, "TASKBRIDGE_ENTITY_ID", &self.entity_id);
        Self::apply_optional(spec, "TASKBRIDGE_PAYLOAD", &self.payload)
    }

    fn apply_optional(spec: ProcessSpec, key: &str, value: &Option<String>) -> ProcessSpec {
        match value {
            Some(value) => spec.with_env(key, value.clone()),
            None => spec,
        }
    }
}

/// Runs one configured shell command per capability call.
#[derive(Debug)]
pub(crate) struct ShellCapabilities<'a> {
    commands: &'a CapabilityCommands,
    logger: &'a Logger,
}

impl<'a> ShellCapabilities<'a> {
    pub(crate) fn new(commands: &'a CapabilityCommands, logger: &'a Logger) -> Self {
        Self { commands, logger }
    }

    fn invoke(
        &self,
        capability: Capability,
        entity_id: Option<&str>,
        payload: Option<String>,
    ) -> CapabilityResult {
        let Some(command) = self.commands.command_for(capability) else {
            return Err(format!("capability {} is not configured", capability));
        };

        let env = CapabilityEnv {
            capability,
            entity_id: entity_id.map(str::to_string),
            payload,
        };
        let mut spec = env.apply(ProcessSpec::bash(command));
        spec.timeout = Some(self.commands.timeout());

        let output = run_process(
            &spec,
            capability.config_key(),
            entity_id.unwrap_or("none"),
            self.logger,
        )?;
        if output.timed_out {
            return Err(format!(
                "timed out after {}ms",
                self.commands.timeout_ms
            ));
        }
        if output.exit_code != 0 {
            return Err(match output.last_stderr_line() {
                Some(line) => format!("exit code {}: {}", output.exit_code, line),
                None => format!("exit code {}", output.exit_code),
            });
        }
        Ok(decode_stdout(&output.stdout))
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|err| format!("failed to encode payload: {err}"))
}

impl Capabilities for ShellCapabilities<'_> {
    fn add_task(&self, data: &Map<String, Value>) -> CapabilityResult {
        self.invoke(Capability::AddTask, None, Some(encode(data)?))
    }

    fn get_tasks(&self) -> CapabilityResult {
        self.invoke(Capability::GetTasks, None, None)
    }

    fn update_task(&self, task_id: &str, data: &Map<String, Value>) -> CapabilityResult {
        self.invoke(Capability::UpdateTask, Some(task_id), Some(encode(data)?))
    }

    fn get_all_projects(&self) -> CapabilityResult {
        self.invoke(Capability::GetAllProjects, None, None)
    }

    fn add_project(&self, data: &Map<String, Value>) -> CapabilityResult {
        self.invoke(Capability::AddProject, None, Some(encode(data)?))
    }

    fn get_all_tags(&self) -> CapabilityResult {
        self.invoke(Capability::GetAllTags, None, None)
    }

    fn add_tag(&self, data: &Map<String, Value>) -> CapabilityResult {
        self.invoke(Capability::AddTag, None, Some(encode(data)?))
    }

    fn update_tag(&self, tag_id: &str, data: &Map<String, Value>) -> CapabilityResult {
        self.invoke(Capability::UpdateTag, Some(tag_id), Some(encode(data)?))
    }

    fn delete_tag(&self, tag_id: &str) -> CapabilityResult {
        self.invoke(Capability::DeleteTag, Some(tag_id), None)
    }

    fn show_snack(&self, message: &str) -> CapabilityResult {
        self.invoke(Capability::ShowSnack, None, Some(encode(message)?))
    }

    fn dispatch_action(&self, action: &Value) -> CapabilityResult {
        self.invoke(Capability::DispatchAction, None, Some(encode(action)?))
    }
}
