//! Engine error types.

use shareflow_cloud::CloudError;
use shareflow_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while orchestrating shares.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid {entity} state transition: {action} from {state}")]
    InvalidStateTransition {
        entity: &'static str,
        state: String,
        action: String,
    },

    #[error("{action}: principal role {role} is not found")]
    PrincipalRoleNotFound { action: String, role: String },

    #[error("{action}: failed to acquire locks on {resources}")]
    ResourceLockTimeout { action: String, resources: String },

    #[error("{action}: {message}")]
    AwsResourceNotFound { action: String, message: String },

    #[error("unauthorized {action}: {message}")]
    Unauthorized { action: String, message: String },

    #[error("{action}: {message}")]
    ShareItemsFound { action: String, message: String },

    #[error("invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task queue closed")]
    QueueClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),
}

impl EngineError {
    pub(crate) fn invalid_input(field: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unauthorized(action: &str, message: impl Into<String>) -> Self {
        EngineError::Unauthorized {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}
