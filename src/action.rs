use std::fmt;

/// Every action name the bridge understands. Parsing is the only place action
/// strings are interpreted; everything downstream matches on this enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Action {
    AddTask,
    GetTasks,
    UpdateTask,
    SetTaskDone,
    GetAllProjects,
    AddProject,
    GetAllTags,
    AddTag,
    UpdateTag,
    DeleteTag,
    ShowSnack,
    CreateBoard,
    ExecuteScript,
}

impl Action {
    pub(crate) const ALL: [Action; 13] = [
        Self::AddTask,
        Self::GetTasks,
        Self::UpdateTask,
        Self::SetTaskDone,
        Self::GetAllProjects,
        Self::AddProject,
        Self::GetAllTags,
        Self::AddTag,
        Self::UpdateTag,
        Self::DeleteTag,
        Self::ShowSnack,
        Self::CreateBoard,
        Self::ExecuteScript,
    ];

    pub(crate) fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "addTask" => Self::AddTask,
            "getTasks" => Self::GetTasks,
            "updateTask" => Self::UpdateTask,
            "setTaskDone" => Self::SetTaskDone,
            "getAllProjects" => Self::GetAllProjects,
            "addProject" => Self::AddProject,
            "getAllTags" => Self::GetAllTags,
            "addTag" => Self::AddTag,
            "updateTag" => Self::UpdateTag,
            "deleteTag" => Self::DeleteTag,
            "showSnack" => Self::ShowSnack,
            "createBoard" | "addBoard" => Self::CreateBoard,
            "executeScript" | "executeNodeScript" => Self::ExecuteScript,
            _ => return None,
        })
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::AddTask => "addTask",
            Self::GetTasks => "getTasks",
            Self::UpdateTask => "updateTask",
            Self::SetTaskDone => "setTaskDone",
            Self::GetAllProjects => "getAllProjects",
            Self::AddProject => "addProject",
            Self::GetAllTags => "getAllTags",
            Self::AddTag => "addTag",
            Self::UpdateTag => "updateTag",
            Self::DeleteTag => "deleteTag",
            Self::ShowSnack => "showSnack",
            Self::CreateBoard => "createBoard",
            Self::ExecuteScript => "executeScript",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
    }

    #[test]
    fn aliases_resolve_to_canonical_actions() {
        assert_eq!(Action::parse("addBoard"), Some(Action::CreateBoard));
        assert_eq!(Action::parse("executeNodeScript"), Some(Action::ExecuteScript));
    }

    #[test]
    fn unknown_names_do_not_parse() {
        assert_eq!(Action::parse("dropDatabase"), None);
        assert_eq!(Action::parse("AddTask"), None);
        assert_eq!(Action::parse(""), None);
        assert_eq!(Action::parse(" addTask "), None);
    }
}
