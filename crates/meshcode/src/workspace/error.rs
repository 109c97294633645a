//! Workspace bridge error types.

use thiserror::Error;

use crate::container::ContainerError;

/// Result type for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Errors surfaced by file and collaboration operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The path or entry name failed sanitization; nothing was executed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The project does not exist in the store.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The project has no running container.
    #[error("container unavailable for project {project_id}: {reason}")]
    ContainerUnavailable { project_id: String, reason: String },

    /// The executor reported a failure; carries the raw diagnostic.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The project store failed.
    #[error("project store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl WorkspaceError {
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath(message.into())
    }

    pub fn unavailable(project_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerUnavailable {
            project_id: project_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<ContainerError> for WorkspaceError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::InvalidInput(msg) => WorkspaceError::InvalidPath(msg),
            ContainerError::ContainerNotFound(id) => WorkspaceError::ContainerUnavailable {
                project_id: String::new(),
                reason: format!("container {} not found", id),
            },
            other => WorkspaceError::ExecutionFailed(other.to_string()),
        }
    }
}
