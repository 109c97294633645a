//! Projects: persistence and container lifecycle.

mod models;
mod repository;
mod service;

pub use models::{CreateProjectRequest, Project};
pub use repository::{ProjectRepository, ProjectStore};
pub use service::ProjectService;

use thiserror::Error;

use crate::container::{ContainerError, HandleState};

pub type ProjectResult<T> = Result<T, ProjectError>;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Provisioning failed; no container handle was recorded.
    #[error("{0}")]
    ProvisionFailed(String),

    /// A recorded container state change that the lifecycle does not allow.
    #[error("container of project {project_id} cannot go from {from} to {to}")]
    InvalidTransition {
        project_id: String,
        from: HandleState,
        to: HandleState,
    },

    #[error("container error: {0}")]
    Container(ContainerError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<ContainerError> for ProjectError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::ProvisionFailed { .. } => ProjectError::ProvisionFailed(err.to_string()),
            other => ProjectError::Container(other),
        }
    }
}
