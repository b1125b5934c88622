use thiserror::Error;

/// Failure of a single command. Every variant is recovered locally and surfaced
/// as a `{success: false, error}` response; none of them stop the watcher.
#[derive(Debug, Error)]
pub(crate) enum BridgeError {
    #[error("invalid command: {0}")]
    MalformedCommand(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("{capability} failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("{0}")]
    Sandbox(String),
}

impl BridgeError {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::MalformedCommand(_) | Self::MissingField(_) | Self::UnknownAction(_) => {
                "validation"
            }
            Self::Capability { .. } | Self::HandlerPanicked(_) => "execution",
            Self::Sandbox(_) => "sandbox",
        }
    }
}
