use thiserror::Error;

/// Rejections raised before any RPC is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidState {
    #[error("session id must not be empty")]
    EmptySessionId,
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("no active session")]
    NoActiveSession,
    #[error("session '{session_id}' is not the active session (active: {active})")]
    NotActive { session_id: String, active: String },
    #[error("an execution is already in flight for session '{session_id}'")]
    ExecutionInFlight { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("invalid state: {0}")]
    InvalidState(#[from] InvalidState),
}

impl KernelError {
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        KernelError::Transport {
            operation,
            message: message.into(),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
