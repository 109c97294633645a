//! Project container lifecycle: provisioning and teardown.

use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::container::ContainerConfig;
use super::error::{ContainerError, ContainerResult};
use super::ContainerRuntimeApi;

/// Environment variable carrying the owning project's id into the container.
pub const PROJECT_ID_ENV: &str = "PROJECT_ID";

/// Label used to find containers owned by this server.
const PROJECT_LABEL: &str = "meshcode.project";

/// Seconds a container gets to stop before it is killed.
const STOP_TIMEOUT_SECS: u32 = 10;

/// Lifecycle state of a project container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum HandleState {
    Provisioning,
    Running,
    Stopped,
    Removed,
}

impl HandleState {
    /// `provisioning -> running -> stopped -> removed`, with no way back from `removed`.
    pub fn can_transition_to(self, next: HandleState) -> bool {
        use HandleState::*;
        matches!(
            (self, next),
            (Provisioning, Running)
                | (Provisioning, Removed)
                | (Running, Stopped)
                | (Running, Removed)
                | (Stopped, Running)
                | (Stopped, Removed)
        )
    }

    /// Map a runtime `State.Status` string onto the handle state.
    pub fn from_runtime_status(status: &str) -> HandleState {
        match status {
            "running" | "restarting" | "paused" => HandleState::Running,
            "created" => HandleState::Provisioning,
            "removing" => HandleState::Removed,
            _ => HandleState::Stopped,
        }
    }
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleState::Provisioning => write!(f, "provisioning"),
            HandleState::Running => write!(f, "running"),
            HandleState::Stopped => write!(f, "stopped"),
            HandleState::Removed => write!(f, "removed"),
        }
    }
}

impl FromStr for HandleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(HandleState::Provisioning),
            "running" => Ok(HandleState::Running),
            "stopped" => Ok(HandleState::Stopped),
            "removed" => Ok(HandleState::Removed),
            _ => Err(format!("unknown container state: {}", s)),
        }
    }
}

/// Opaque reference to a project's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub state: HandleState,
}

impl ContainerHandle {
    pub fn is_running(&self) -> bool {
        self.state == HandleState::Running
    }
}

/// Settings for provisioned containers.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Image every project container is created from.
    pub image: String,
    /// Directory inside the container holding the project files.
    pub project_root: String,
    /// Long-running command keeping the container alive.
    pub keepalive_command: Vec<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            image: "meshcode-runtime:latest".to_string(),
            project_root: "/project".to_string(),
            keepalive_command: vec!["/bin/bash".to_string()],
        }
    }
}

/// Creates and destroys project containers.
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntimeApi>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>, config: LifecycleConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntimeApi> {
        &self.runtime
    }

    /// Container name for a project: `project-<slug>-<millis>`.
    pub fn container_name(project_name: &str) -> String {
        let mut slug: String = project_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        slug = slug
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        slug.truncate(48);
        let slug = slug.trim_end_matches('-');
        let slug = if slug.is_empty() { "workspace" } else { slug };
        format!(
            "project-{}-{}",
            slug,
            chrono::Utc::now().timestamp_millis()
        )
    }

    /// Create and start a container for the project.
    ///
    /// On any failure the partially created container is removed and
    /// `ProvisionFailed` is returned; callers record the handle only on success.
    pub async fn provision(
        &self,
        project_id: &str,
        project_name: &str,
    ) -> ContainerResult<ContainerHandle> {
        let config = ContainerConfig::new(&self.config.image)
            .name(Self::container_name(project_name))
            .env(PROJECT_ID_ENV, project_id)
            .label(PROJECT_LABEL, project_id)
            .workdir(&self.config.project_root)
            .tty(true)
            .command(self.config.keepalive_command.clone());

        info!(
            "Provisioning container for project {} from {}",
            project_id, self.config.image
        );

        let id = self
            .runtime
            .create_container(&config)
            .await
            .map_err(|e| provision_failed(project_id, e))?;

        if let Err(e) = self.runtime.start_container(&id).await {
            warn!(
                "Starting container {} for project {} failed, removing it: {}",
                id, project_id, e
            );
            if let Err(rm_err) = self.runtime.remove_container(&id, true).await {
                warn!("Failed to remove unstarted container {}: {}", id, rm_err);
            }
            return Err(provision_failed(project_id, e));
        }

        info!("Container {} running for project {}", id, project_id);
        Ok(ContainerHandle {
            id,
            state: HandleState::Running,
        })
    }

    /// Stop then remove a container. Already stopped or missing containers are
    /// not errors, so teardown can be retried safely.
    pub async fn teardown(&self, container_id: &str) -> ContainerResult<HandleState> {
        match self
            .runtime
            .stop_container(container_id, Some(STOP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => debug!("Stopped container {}", container_id),
            Err(e) if e.is_not_found() => {
                debug!("Container {} already gone", container_id);
                return Ok(HandleState::Removed);
            }
            Err(e) if e.is_not_running() => debug!("Container {} not running", container_id),
            Err(e) => return Err(e),
        }

        match self.runtime.remove_container(container_id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!("Removed container {}", container_id);
        Ok(HandleState::Removed)
    }

    /// Start a stopped container again.
    pub async fn resume(&self, container_id: &str) -> ContainerResult<ContainerHandle> {
        self.runtime.start_container(container_id).await?;
        info!("Resumed container {}", container_id);
        Ok(ContainerHandle {
            id: container_id.to_string(),
            state: HandleState::Running,
        })
    }

    /// Current state as reported by the runtime.
    pub async fn observe(&self, container_id: &str) -> ContainerResult<HandleState> {
        Ok(match self.runtime.container_state_status(container_id).await? {
            Some(status) => HandleState::from_runtime_status(&status),
            None => HandleState::Removed,
        })
    }
}

fn provision_failed(project_id: &str, error: ContainerError) -> ContainerError {
    ContainerError::ProvisionFailed {
        project_id: project_id.to_string(),
        message: error.to_string(),
    }
}
