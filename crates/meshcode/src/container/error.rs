//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime CLI itself failed (spawn error or non-zero exit).
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// A command executed inside the container exited unsuccessfully.
    #[error("command `{command}` exited with {}: {stderr}", describe_exit(.exit_code))]
    ExecFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Image was not found.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Provisioning a project container failed; nothing was recorded.
    #[error("failed to provision container for project {project_id}: {message}")]
    ProvisionFailed { project_id: String, message: String },

    /// An interactive session or stream is no longer accepting input.
    #[error("stream closed")]
    StreamClosed,

    /// No container runtime available.
    #[error("no container runtime available (docker or podman)")]
    NoRuntimeAvailable,

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Whether the error means the container no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            ContainerError::ContainerNotFound(_) => true,
            ContainerError::CommandFailed { message, .. } => looks_like_missing(message),
            ContainerError::ExecFailed { stderr, .. } => looks_like_missing(stderr),
            _ => false,
        }
    }

    /// Whether the error means the container exists but is not running.
    pub fn is_not_running(&self) -> bool {
        match self {
            ContainerError::CommandFailed { message, .. } => looks_like_stopped(message),
            ContainerError::ExecFailed { stderr, .. } => looks_like_stopped(stderr),
            _ => false,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

fn looks_like_stopped(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("is not running") || lower.contains("container state improper")
}

/// Docker and Podman phrase missing containers differently.
pub(crate) fn looks_like_missing(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no such container") || lower.contains("no container with name or id")
}
