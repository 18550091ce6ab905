//! Cloud capability error types.

use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur in remote cloud operations.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("S3 operation failed: {0}")]
    S3(String),

    #[error("IAM operation failed: {0}")]
    Iam(String),

    #[error("assume role failed: {0}")]
    AssumeRole(String),

    #[error("STS credentials expired or invalid")]
    CredentialExpired,

    #[error("catalog permission operation failed: {0}")]
    Catalog(String),

    #[error("resource share invitation failed: {0}")]
    ResourceShare(String),

    #[error("key policy operation failed: {0}")]
    KeyPolicy(String),

    #[error("warehouse operation failed: {0}")]
    Warehouse(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid policy document: {0}")]
    InvalidPolicy(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("simulated failure: {0}")]
    Simulated(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no client configured for {0}")]
    Unsupported(String),
}
