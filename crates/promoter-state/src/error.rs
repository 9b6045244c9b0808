//! Error types for collaborator calls.

use thiserror::Error;

/// Errors returned by an external collaborator (credentials store, Argo CD,
/// render service, git/helm tooling, pull-request provider).
#[derive(Error, Debug)]
pub enum CollaboratorError {
    /// Remote endpoint could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// Caller is not allowed to perform the operation
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator rejected the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed (exit code {exit_code}): {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Response payload could not be decoded
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::Decode(err.to_string())
    }
}

/// Result type for collaborator calls
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;
