//! Application state shared across handlers.

use std::sync::Arc;

use crate::cache::{ContentCache, MemoryCache};
use crate::container::{ContainerRuntimeApi, LifecycleConfig, LifecycleManager};
use crate::flush::FlushConfig;
use crate::project::{ProjectService, ProjectStore};
use crate::terminal::TerminalService;
use crate::workspace::{DEFAULT_MAX_INLINE_WRITE_BYTES, WorkspaceService};
use crate::ws::{CollabService, RoomHub};

/// Tunables used to wire the services together.
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub lifecycle: LifecycleConfig,
    pub flush: FlushConfig,
    pub max_inline_write_bytes: usize,
    /// Terminal shell command; empty keeps the default.
    pub shell: Vec<String>,
    /// Origins allowed by CORS; empty allows localhost only.
    pub cors_origins: Vec<String>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            flush: FlushConfig::default(),
            max_inline_write_bytes: DEFAULT_MAX_INLINE_WRITE_BYTES,
            shell: Vec::new(),
            cors_origins: Vec::new(),
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Project records and container lifecycle.
    pub projects: Arc<ProjectService>,
    /// File operations, edit cache and broadcasts.
    pub collab: Arc<CollabService>,
    /// Interactive shells.
    pub terminals: Arc<TerminalService>,
    /// WebSocket rooms.
    pub hub: Arc<RoomHub>,
    /// Origins allowed by CORS.
    pub cors_origins: Arc<Vec<String>>,
}

impl AppState {
    /// Build the service graph on top of a runtime and a project store.
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        store: Arc<dyn ProjectStore>,
        config: StateConfig,
    ) -> Self {
        let project_root = config.lifecycle.project_root.clone();
        let lifecycle = Arc::new(LifecycleManager::new(runtime.clone(), config.lifecycle));
        let projects = Arc::new(ProjectService::new(store, lifecycle));

        let workspace = Arc::new(
            WorkspaceService::new(runtime.clone(), projects.clone(), project_root)
                .with_max_inline_write_bytes(config.max_inline_write_bytes),
        );
        let cache: Arc<dyn ContentCache> = Arc::new(MemoryCache::new());
        let hub = Arc::new(RoomHub::new());
        let collab = Arc::new(CollabService::new(
            workspace,
            cache,
            hub.clone(),
            config.flush,
        ));
        let terminals = Arc::new(TerminalService::new(runtime).with_shell(config.shell));

        Self {
            projects,
            collab,
            terminals,
            hub,
            cors_origins: Arc::new(config.cors_origins),
        }
    }
}
