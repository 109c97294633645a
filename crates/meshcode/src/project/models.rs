//! Project data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::container::{ContainerHandle, HandleState};

/// A project and the container backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    /// User that created the project.
    pub owner_id: String,
    /// Runtime container id, null until the first successful provisioning.
    pub container_id: Option<String>,
    pub container_state: Option<HandleState>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    /// Build a new project record without a container.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            owner_id: owner_id.into(),
            container_id: None,
            container_state: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// The container handle, if one has been recorded.
    pub fn handle(&self) -> Option<ContainerHandle> {
        let id = self.container_id.clone()?;
        Some(ContainerHandle {
            id,
            state: self.container_state.unwrap_or(HandleState::Provisioning),
        })
    }
}

/// Request to create a project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "owner_id")]
    pub owner_id: String,
}
