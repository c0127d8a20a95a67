use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum SessionError {
    BackendUnavailable {
        backend: String,
    },
    CreationFailed {
        session_id: String,
        retries: u32,
        message: String,
    },
    OperationInProgress {
        session_id: String,
    },
    SessionNotFound {
        session_id: String,
    },
    OperationFailed {
        operation: String,
        message: String,
    },
    TimedOut {
        command: String,
        seconds: u64,
    },
    InvalidIdentity {
        session_id: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
    ConfigError {
        key: String,
        message: String,
    },
    CheckpointDecode {
        message: String,
    },
}

impl SessionError {
    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        SessionError::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn operation_failed(operation: &str, error: impl ToString) -> Self {
        SessionError::OperationFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn config(key: &str, message: impl ToString) -> Self {
        SessionError::ConfigError {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Errors a caller may retry later without treating the session as broken.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::OperationInProgress { .. } | SessionError::TimedOut { .. }
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BackendUnavailable { backend } => {
                write!(f, "Session backend '{backend}' is not available")
            }
            Self::CreationFailed {
                session_id,
                retries,
                message,
            } => {
                write!(
                    f,
                    "Failed to create session '{session_id}' after {retries} attempt(s): {message}"
                )
            }
            Self::OperationInProgress { session_id } => {
                write!(f, "An operation for session '{session_id}' is already in progress")
            }
            Self::SessionNotFound { session_id } => {
                write!(f, "Session '{session_id}' not found")
            }
            Self::OperationFailed { operation, message } => {
                write!(f, "Session operation '{operation}' failed: {message}")
            }
            Self::TimedOut { command, seconds } => {
                write!(f, "Command '{command}' timed out after {seconds}s")
            }
            Self::InvalidIdentity { session_id } => {
                write!(f, "'{session_id}' is not a valid session identity")
            }
            Self::IoError {
                operation,
                path,
                message,
            } => {
                write!(f, "I/O error during '{operation}' on '{path}': {message}")
            }
            Self::ConfigError { key, message } => {
                write!(f, "Configuration error for key '{key}': {message}")
            }
            Self::CheckpointDecode { message } => {
                write!(f, "Checkpoint could not be decoded: {message}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SessionError> for String {
    fn from(error: SessionError) -> Self {
        error.to_string()
    }
}
