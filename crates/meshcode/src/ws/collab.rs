//! Collaborative editing on top of the workspace.
//!
//! Edits land in the write-back cache and are fanned out to the file room
//! right away; the container only sees them when the debounced flush fires.
//! Structural changes (create, rename, delete) go to the container first and
//! are broadcast to the project room only once they succeeded.

use std::sync::Arc;

use log::{debug, info};

use super::hub::{ConnectionId, RoomHub, RoomId};
use super::types::WsEvent;
use crate::cache::{CacheKey, ContentCache};
use crate::flush::{FlushConfig, FlushScheduler};
use crate::workspace::{
    EntryName, FileSystemNode, NodeKind, RelativePath, WorkspaceError, WorkspaceResult,
    WorkspaceService,
};

pub struct CollabService {
    workspace: Arc<WorkspaceService>,
    cache: Arc<dyn ContentCache>,
    hub: Arc<RoomHub>,
    flush: FlushScheduler,
}

impl CollabService {
    pub fn new(
        workspace: Arc<WorkspaceService>,
        cache: Arc<dyn ContentCache>,
        hub: Arc<RoomHub>,
        flush_config: FlushConfig,
    ) -> Self {
        let flush = FlushScheduler::new(cache.clone(), workspace.clone(), flush_config);
        Self {
            workspace,
            cache,
            hub,
            flush,
        }
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn workspace(&self) -> &Arc<WorkspaceService> {
        &self.workspace
    }

    pub fn cache(&self) -> &Arc<dyn ContentCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.flush
    }

    async fn ensure_project(&self, project_id: &str) -> WorkspaceResult<()> {
        if self.workspace.projects().exists(project_id).await? {
            Ok(())
        } else {
            Err(WorkspaceError::ProjectNotFound(project_id.to_string()))
        }
    }

    // ========== Rooms ==========

    pub async fn join_project(&self, conn_id: ConnectionId, project_id: &str) -> WorkspaceResult<()> {
        self.ensure_project(project_id).await?;
        self.hub.join_project(conn_id, project_id);
        Ok(())
    }

    /// Join a file room and send the file's content to the joining connection.
    pub async fn join_file(
        &self,
        conn_id: ConnectionId,
        project_id: &str,
        path: &str,
    ) -> WorkspaceResult<()> {
        let path = RelativePath::parse(path)?;
        let room = RoomId::file(project_id, path.clone());

        // Join before reading so edits made during the read are not missed.
        let was_member = self.hub.is_member(conn_id, &room);
        self.hub.join(conn_id, room.clone());
        let content = match self.read_content(project_id, &path).await {
            Ok(content) => content,
            Err(e) => {
                if !was_member {
                    self.hub.leave(conn_id, &room);
                }
                return Err(e);
            }
        };
        self.hub.send_to(
            conn_id,
            WsEvent::FileContent {
                path: path.to_string(),
                content,
            },
        );
        Ok(())
    }

    pub fn leave_file(&self, conn_id: ConnectionId, project_id: &str, path: &str) -> WorkspaceResult<()> {
        let path = RelativePath::parse(path)?;
        self.hub.leave(conn_id, &RoomId::file(project_id, path));
        Ok(())
    }

    // ========== Content ==========

    /// File content, from the cache when present, else read from the container.
    pub async fn read_content(&self, project_id: &str, path: &RelativePath) -> WorkspaceResult<String> {
        let key = CacheKey::new(project_id, path.clone());
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(cached.content);
        }

        let content = self.workspace.read_file(project_id, path).await?;
        if self.cache.insert_clean(&key, content.clone()).await {
            return Ok(content);
        }
        // An edit arrived while reading; it wins over the container copy.
        Ok(self
            .cache
            .get(&key)
            .await
            .map(|cached| cached.content)
            .unwrap_or(content))
    }

    /// Record an edit, fan it out to the file room and re-arm the flush.
    pub async fn edit_file(
        &self,
        sender: Option<ConnectionId>,
        project_id: &str,
        path: &str,
        content: String,
    ) -> WorkspaceResult<()> {
        let path = RelativePath::parse(path)?;
        if path.is_root() {
            return Err(WorkspaceError::invalid_path("cannot edit the project root"));
        }
        self.ensure_project(project_id).await?;

        let key = CacheKey::new(project_id, path.clone());
        self.cache.set(&key, content.clone()).await;

        self.hub.broadcast(
            &RoomId::file(project_id, path.clone()),
            WsEvent::FileEdited {
                path: path.to_string(),
                content,
            },
            sender,
        );
        self.flush.arm(key);
        Ok(())
    }

    /// Write content straight through to the container.
    pub async fn save_file(&self, project_id: &str, path: &str, content: String) -> WorkspaceResult<()> {
        let path = RelativePath::parse(path)?;
        self.workspace.write_file(project_id, &path, &content).await?;

        let key = CacheKey::new(project_id, path.clone());
        self.flush.cancel(&key);
        let version = self.cache.set(&key, content.clone()).await;
        self.cache.mark_flushed(&key, version).await;

        self.hub.broadcast(
            &RoomId::file(project_id, path.clone()),
            WsEvent::FileEdited {
                path: path.to_string(),
                content,
            },
            None,
        );
        Ok(())
    }

    // ========== Structure ==========

    pub async fn list_tree(&self, project_id: &str) -> WorkspaceResult<Vec<FileSystemNode>> {
        self.workspace.list_tree(project_id).await
    }

    /// Create a file or folder and announce it to the project room.
    pub async fn create_entry(
        &self,
        project_id: &str,
        parent: Option<&str>,
        name: &str,
        kind: NodeKind,
        content: Option<&str>,
    ) -> WorkspaceResult<RelativePath> {
        let parent = match parent {
            Some(parent) => RelativePath::parse(parent)?,
            None => RelativePath::root(),
        };
        let name = EntryName::parse(name)?;

        let path = self
            .workspace
            .create_entry(project_id, &parent, &name, kind, content)
            .await?;
        info!("[{}] created {} {}", project_id, kind, path);

        self.hub.broadcast(
            &RoomId::project(project_id),
            WsEvent::FileCreated {
                path: path.to_string(),
                name: name.to_string(),
                kind,
            },
            None,
        );
        Ok(path)
    }

    /// Rename an entry, carrying cached content and pending flushes along.
    pub async fn rename_entry(
        &self,
        project_id: &str,
        path: &str,
        new_name: &str,
    ) -> WorkspaceResult<RelativePath> {
        let path = structural_target(path)?;
        let new_name = EntryName::parse(new_name)?;
        self.workspace.ensure_available(project_id).await?;

        let pending = self.flush.cancel_prefix(project_id, &path);
        let new_path = match self
            .workspace
            .rename_entry(project_id, &path, &new_name)
            .await
        {
            Ok(new_path) => new_path,
            Err(e) => {
                self.rearm(pending);
                return Err(e);
            }
        };

        self.cache.rekey_prefix(project_id, &path, &new_path).await;
        self.rearm(pending.into_iter().filter_map(|key| {
            key.path
                .rebase(&path, &new_path)
                .map(|rebased| CacheKey::new(project_id, rebased))
        }));
        info!("[{}] renamed {} -> {}", project_id, path, new_path);

        self.hub.broadcast(
            &RoomId::project(project_id),
            WsEvent::FileRenamed {
                path: path.to_string(),
                new_path: new_path.to_string(),
                new_name: new_name.to_string(),
            },
            None,
        );
        Ok(new_path)
    }

    /// Delete an entry; cached content and pending flushes below it are dropped.
    pub async fn delete_entry(&self, project_id: &str, path: &str) -> WorkspaceResult<()> {
        let path = structural_target(path)?;
        self.workspace.ensure_available(project_id).await?;

        let pending = self.flush.cancel_prefix(project_id, &path);
        if let Err(e) = self.workspace.delete_entry(project_id, &path).await {
            self.rearm(pending);
            return Err(e);
        }

        let dropped = self.cache.remove_prefix(project_id, &path).await;
        info!(
            "[{}] deleted {} ({} cached entries dropped)",
            project_id, path, dropped
        );

        self.hub.broadcast(
            &RoomId::project(project_id),
            WsEvent::FileDeleted {
                path: path.to_string(),
            },
            None,
        );
        Ok(())
    }

    fn rearm(&self, keys: impl IntoIterator<Item = CacheKey>) {
        for key in keys {
            self.flush.arm(key);
        }
    }

    /// Pass a client-reported name or path change on to the rest of the
    /// project room.
    pub fn relay_metadata(
        &self,
        conn_id: ConnectionId,
        project_id: &str,
        old_path: &str,
        new_path: &str,
        new_name: &str,
    ) -> WorkspaceResult<usize> {
        let old_path = RelativePath::parse(old_path)?;
        let new_path = RelativePath::parse(new_path)?;
        let new_name = EntryName::parse(new_name)?;

        Ok(self.hub.broadcast(
            &RoomId::project(project_id),
            WsEvent::FileMetadataChanged {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
                new_name: new_name.to_string(),
            },
            Some(conn_id),
        ))
    }

    /// Tell the project room to reload its tree.
    pub fn notify_refresh(&self, project_id: &str) -> usize {
        self.hub
            .broadcast(&RoomId::project(project_id), WsEvent::RefreshFiles, None)
    }

    /// Forget everything held for a deleted project.
    pub async fn purge_project(&self, project_id: &str) {
        let timers = self.flush.cancel_project(project_id);
        let entries = self.cache.purge_project(project_id).await;
        self.hub.close_project(project_id);
        info!(
            "Purged project {} ({} pending flushes, {} cached files)",
            project_id, timers, entries
        );
    }

    /// Write every dirty entry now. Returns the number of failed writes.
    pub async fn flush_all(&self) -> usize {
        self.flush.flush_all().await
    }
}

/// Parse the target of a rename or delete; the root itself is off limits.
fn structural_target(path: &str) -> WorkspaceResult<RelativePath> {
    let path = RelativePath::parse(path)?;
    if path.is_root() {
        return Err(WorkspaceError::invalid_path(
            "cannot rename or delete the project root",
        ));
    }
    Ok(path)
}
