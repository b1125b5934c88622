use serde_json::{json, Map, Value};

use crate::action::Action;
use crate::capabilities::{Capabilities, Capability, CapabilityResult};
use crate::command::{now_millis, Command};
use crate::error::BridgeError;
use crate::logger::Logger;
use crate::sandbox::ScriptSandbox;

pub(crate) const BOARD_ADD_ACTION: &str = "[Boards] Add Board";

pub(crate) type Handler = fn(&ActionDispatcher<'_>, &Command) -> Result<Value, BridgeError>;

/// Dispatch table: one handler per action, checked for exhaustiveness at build time.
pub(crate) fn handler_for(action: Action) -> Handler {
    match action {
        Action::AddTask => add_task,
        Action::GetTasks => get_tasks,
        Action::UpdateTask => update_task,
        Action::SetTaskDone => set_task_done,
        Action::GetAllProjects => get_all_projects,
        Action::AddProject => add_project,
        Action::GetAllTags => get_all_tags,
        Action::AddTag => add_tag,
        Action::UpdateTag => update_tag,
        Action::DeleteTag => delete_tag,
        Action::ShowSnack => show_snack,
        Action::CreateBoard => create_board,
        Action::ExecuteScript => execute_script,
    }
}

pub(crate) struct ActionDispatcher<'a> {
    capabilities: &'a dyn Capabilities,
    sandbox: &'a ScriptSandbox,
    logger: &'a Logger,
}

impl<'a> ActionDispatcher<'a> {
    pub(crate) fn new(
        capabilities: &'a dyn Capabilities,
        sandbox: &'a ScriptSandbox,
        logger: &'a Logger,
    ) -> Self {
        Self {
            capabilities,
            sandbox,
            logger,
        }
    }

    pub(crate) fn dispatch(&self, command: &Command) -> Result<Value, BridgeError> {
        let Some(action) = Action::parse(&command.action) else {
            return Err(BridgeError::UnknownAction(command.action.clone()));
        };
        self.logger.log_event(
            "dispatch",
            &[
                ("action", action.as_str()),
                ("id", command.response_id().unwrap_or("none")),
            ],
        );
        handler_for(action)(self, command)
    }

    fn call(
        &self,
        capability: Capability,
        invoke: impl FnOnce(&dyn Capabilities) -> CapabilityResult,
    ) -> Result<Value, BridgeError> {
        invoke(self.capabilities).map_err(|message| BridgeError::Capability {
            capability: capability.as_str(),
            message,
        })
    }
}

fn require_data(command: &Command) -> Result<&Map<String, Value>, BridgeError> {
    command.data.as_ref().ok_or(BridgeError::MissingField("data"))
}

fn require_text<'c>(
    value: &'c Option<String>,
    field: &'static str,
) -> Result<&'c str, BridgeError> {
    value
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or(BridgeError::MissingField(field))
}

fn add_task(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let data = require_data(command)?;
    d.call(Capability::AddTask, |caps| caps.add_task(data))
}

fn get_tasks(d: &ActionDispatcher<'_>, _command: &Command) -> Result<Value, BridgeError> {
    d.call(Capability::GetTasks, |caps| caps.get_tasks())
}

fn update_task(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let task_id = require_text(&command.task_id, "taskId")?;
    let data = require_data(command)?;
    if let Some(tag_ids) = data.get("tagIds") {
        let rendered = render_tag_ids(tag_ids);
        d.logger.log_event(
            "update_task_tags",
            &[("task", task_id), ("tag_ids", rendered.as_str())],
        );
    }
    d.call(Capability::UpdateTask, |caps| caps.update_task(task_id, data))
}

fn render_tag_ids(tag_ids: &Value) -> String {
    match tag_ids {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn set_task_done(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let task_id = require_text(&command.task_id, "taskId")?;
    let mut data = Map::new();
    data.insert("isDone".to_string(), Value::Bool(true));
    data.insert("doneOn".to_string(), json!(now_millis()));
    d.call(Capability::UpdateTask, |caps| caps.update_task(task_id, &data))
}

fn get_all_projects(d: &ActionDispatcher<'_>, _command: &Command) -> Result<Value, BridgeError> {
    d.call(Capability::GetAllProjects, |caps| caps.get_all_projects())
}

fn add_project(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let data = require_data(command)?;
    d.call(Capability::AddProject, |caps| caps.add_project(data))
}

fn get_all_tags(d: &ActionDispatcher<'_>, _command: &Command) -> Result<Value, BridgeError> {
    d.call(Capability::GetAllTags, |caps| caps.get_all_tags())
}

fn add_tag(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let data = require_data(command)?;
    d.call(Capability::AddTag, |caps| caps.add_tag(data))
}

fn update_tag(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let tag_id = require_text(&command.tag_id, "tagId")?;
    let data = require_data(command)?;
    d.call(Capability::UpdateTag, |caps| caps.update_tag(tag_id, data))
}

fn delete_tag(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let tag_id = require_text(&command.tag_id, "tagId")?;
    d.call(Capability::DeleteTag, |caps| caps.delete_tag(tag_id))
}

fn show_snack(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let message = require_text(&command.message, "message")?;
    d.call(Capability::ShowSnack, |caps| caps.show_snack(message))
}

fn create_board(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let board = require_data(command)?;
    let action = json!({
        "type": BOARD_ADD_ACTION,
        "board": board,
    });
    d.call(Capability::DispatchAction, |caps| caps.dispatch_action(&action))
}

fn execute_script(d: &ActionDispatcher<'_>, command: &Command) -> Result<Value, BridgeError> {
    let script = require_text(&command.script, "script")?;
    let id_token = command.response_id().unwrap_or("none");
    d.sandbox
        .execute(script, &command.args, id_token, d.logger)
        .into_result()
        .map_err(BridgeError::Sandbox)
}
