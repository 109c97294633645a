//! Project lifecycle service.
//!
//! Ties project records to their containers. Provisioning and teardown of the
//! same project never overlap: both run under a per-project async lock.

use std::sync::Arc;

use dashmap::DashMap;
use log::{info, warn};
use tokio::sync::Mutex;

use super::models::{CreateProjectRequest, Project};
use super::repository::ProjectStore;
use super::{ProjectError, ProjectResult};
use crate::container::{ContainerHandle, HandleState, LifecycleManager};
use crate::workspace::{WorkspaceError, WorkspaceResult};

pub struct ProjectService {
    store: Arc<dyn ProjectStore>,
    lifecycle: Arc<LifecycleManager>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn ProjectStore>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            store,
            lifecycle,
            locks: DashMap::new(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    fn lock_for(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get_project(&self, project_id: &str) -> ProjectResult<Project> {
        self.store
            .get(project_id)
            .await?
            .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))
    }

    pub async fn list_projects(&self, owner_id: Option<&str>) -> ProjectResult<Vec<Project>> {
        Ok(self.store.list(owner_id).await?)
    }

    /// Create the project record, then provision its container.
    ///
    /// If provisioning fails the record stays without a container and the
    /// error is returned so the caller can retry with [`Self::provision`].
    pub async fn create_project(&self, request: CreateProjectRequest) -> ProjectResult<Project> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ProjectError::InvalidInput(
                "project name cannot be empty".to_string(),
            ));
        }
        if request.owner_id.trim().is_empty() {
            return Err(ProjectError::InvalidInput(
                "owner id cannot be empty".to_string(),
            ));
        }

        let project = Project::new(
            uuid::Uuid::new_v4().to_string(),
            name,
            request.description.trim(),
            request.owner_id.trim(),
        );
        self.store.insert(&project).await?;
        info!("Created project {} ({})", project.id, project.name);

        self.provision(&project.id).await
    }

    /// Make sure the project has a running container.
    ///
    /// A running container is kept, a stopped one is started again and a
    /// missing one is replaced by a freshly provisioned container.
    pub async fn provision(&self, project_id: &str) -> ProjectResult<Project> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let project = self.get_project(project_id).await?;

        // A handle recorded as removed is never revived; it gets replaced.
        if let Some(handle) = project.handle().filter(|h| h.state != HandleState::Removed) {
            let observed = self.lifecycle.observe(&handle.id).await?;
            match observed {
                HandleState::Running => {
                    self.record_state(&project, HandleState::Running).await?;
                    return self.get_project(project_id).await;
                }
                HandleState::Stopped | HandleState::Provisioning => {
                    self.lifecycle.resume(&handle.id).await?;
                    self.record_state(&project, HandleState::Running).await?;
                    return self.get_project(project_id).await;
                }
                HandleState::Removed => {
                    warn!(
                        "Container {} of project {} is gone, provisioning a new one",
                        handle.id, project_id
                    );
                }
            }
        }

        self.store
            .set_container(project_id, None, Some(HandleState::Provisioning))
            .await?;

        match self.lifecycle.provision(&project.id, &project.name).await {
            Ok(handle) => {
                self.store
                    .set_container(project_id, Some(&handle.id), Some(handle.state))
                    .await?;
                self.get_project(project_id).await
            }
            Err(e) => {
                self.store.set_container(project_id, None, None).await?;
                Err(e.into())
            }
        }
    }

    /// Tear down the container, then delete the record.
    ///
    /// A teardown failure leaves the record in place so deletion can be retried.
    pub async fn delete_project(&self, project_id: &str) -> ProjectResult<Project> {
        let lock = self.lock_for(project_id);
        let guard = lock.lock().await;

        let project = self.get_project(project_id).await?;
        if let Some(handle) = project.handle() {
            let state = self.lifecycle.teardown(&handle.id).await?;
            self.record_state(&project, state).await?;
        }

        self.store.delete(project_id).await?;
        drop(guard);
        self.locks.remove(project_id);

        info!("Deleted project {}", project_id);
        Ok(project)
    }

    /// Store a new state for the project's current container handle.
    async fn record_state(&self, project: &Project, next: HandleState) -> ProjectResult<()> {
        let Some(current) = project.container_state else {
            self.store.set_container_state(&project.id, next).await?;
            return Ok(());
        };
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(ProjectError::InvalidTransition {
                project_id: project.id.clone(),
                from: current,
                to: next,
            });
        }
        self.store.set_container_state(&project.id, next).await?;
        Ok(())
    }

    /// The running container of a project.
    ///
    /// Fails with `ProjectNotFound` for unknown projects and with
    /// `ContainerUnavailable` when no running container is recorded.
    pub async fn container_handle(&self, project_id: &str) -> WorkspaceResult<ContainerHandle> {
        let project = self
            .store
            .get(project_id)
            .await?
            .ok_or_else(|| WorkspaceError::ProjectNotFound(project_id.to_string()))?;

        match project.handle() {
            Some(handle) if handle.is_running() => Ok(handle),
            Some(handle) => Err(WorkspaceError::unavailable(
                project_id,
                format!("container is {}", handle.state),
            )),
            None => Err(WorkspaceError::unavailable(
                project_id,
                "no container provisioned",
            )),
        }
    }

    /// Project owning a container, used to authorize raw container handles.
    pub async fn project_for_container(&self, container_id: &str) -> ProjectResult<Option<Project>> {
        Ok(self.store.find_by_container(container_id).await?)
    }

    /// Whether a project exists.
    pub async fn exists(&self, project_id: &str) -> WorkspaceResult<bool> {
        Ok(self.store.get(project_id).await?.is_some())
    }
}
