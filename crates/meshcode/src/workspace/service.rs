//! File operations against a project's container.
//!
//! Every operation resolves the project's running container first, so an
//! unknown project or a missing container fails before anything is executed.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::commands::{FileCommands, MAX_INLINE_SCRIPT_BYTES, fits_inline, single_file_archive};
use super::paths::{EntryName, RelativePath, strip_content_controls};
use super::tree::{FileSystemNode, ListingFormat, NodeKind, build_file_tree, parse_listing};
use super::{WorkspaceError, WorkspaceResult};
use crate::cache::CacheKey;
use crate::container::{ContainerError, ContainerRuntimeApi, ExecOutput};
use crate::flush::FlushSink;
use crate::project::ProjectService;

/// Default quoted size above which writes go through an archive instead of `sh -c`.
pub const DEFAULT_MAX_INLINE_WRITE_BYTES: usize = 64 * 1024;

pub struct WorkspaceService {
    runtime: Arc<dyn ContainerRuntimeApi>,
    projects: Arc<ProjectService>,
    commands: FileCommands,
    max_inline_write_bytes: usize,
}

impl WorkspaceService {
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        projects: Arc<ProjectService>,
        project_root: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            projects,
            commands: FileCommands::new(project_root),
            max_inline_write_bytes: DEFAULT_MAX_INLINE_WRITE_BYTES,
        }
    }

    /// Capped at [`MAX_INLINE_SCRIPT_BYTES`].
    pub fn with_max_inline_write_bytes(mut self, limit: usize) -> Self {
        self.max_inline_write_bytes = limit.min(MAX_INLINE_SCRIPT_BYTES);
        self
    }

    pub fn commands(&self) -> &FileCommands {
        &self.commands
    }

    pub fn projects(&self) -> &Arc<ProjectService> {
        &self.projects
    }

    async fn container_id(&self, project_id: &str) -> WorkspaceResult<String> {
        Ok(self.projects.container_handle(project_id).await?.id)
    }

    async fn exec(
        &self,
        project_id: &str,
        container_id: &str,
        argv: Vec<String>,
    ) -> WorkspaceResult<ExecOutput> {
        debug!("[{}] exec {:?}", project_id, argv.first());
        self.runtime
            .exec_output(container_id, &argv)
            .await
            .map_err(|e| exec_error(project_id, e))
    }

    /// Current file tree of the project.
    pub async fn list_tree(&self, project_id: &str) -> WorkspaceResult<Vec<FileSystemNode>> {
        let container_id = self.container_id(project_id).await?;
        let output = self
            .exec(project_id, &container_id, self.commands.list())
            .await?;

        let entries = parse_listing(
            &output.stdout_lossy(),
            self.commands.root(),
            ListingFormat::Typed,
        );
        Ok(build_file_tree(&entries))
    }

    /// Content of a file as stored in the container.
    pub async fn read_file(&self, project_id: &str, path: &RelativePath) -> WorkspaceResult<String> {
        reject_root(path)?;
        let container_id = self.container_id(project_id).await?;
        let output = self
            .exec(project_id, &container_id, self.commands.read(path))
            .await?;
        Ok(strip_content_controls(&output.stdout_lossy()))
    }

    /// Overwrite a file.
    pub async fn write_file(
        &self,
        project_id: &str,
        path: &RelativePath,
        content: &str,
    ) -> WorkspaceResult<()> {
        reject_root(path)?;
        let container_id = self.container_id(project_id).await?;

        if fits_inline(content, self.max_inline_write_bytes) {
            self.exec(
                project_id,
                &container_id,
                self.commands.write_inline(path, content),
            )
            .await?;
            return Ok(());
        }

        let (parent, name) = split_file_path(path)?;
        self.put_file(project_id, &container_id, &parent, &name, content)
            .await
    }

    async fn put_file(
        &self,
        project_id: &str,
        container_id: &str,
        parent: &RelativePath,
        name: &EntryName,
        content: &str,
    ) -> WorkspaceResult<()> {
        let archive = single_file_archive(name, content.as_bytes())
            .map_err(|e| WorkspaceError::ExecutionFailed(format!("building archive: {}", e)))?;
        self.runtime
            .put_archive(container_id, &self.commands.container_path(parent), archive)
            .await
            .map_err(|e| exec_error(project_id, e))
    }

    /// Create a file or folder named `name` inside `parent`.
    ///
    /// Missing parent directories are created. Returns the new entry's path.
    pub async fn create_entry(
        &self,
        project_id: &str,
        parent: &RelativePath,
        name: &EntryName,
        kind: NodeKind,
        content: Option<&str>,
    ) -> WorkspaceResult<RelativePath> {
        let container_id = self.container_id(project_id).await?;
        let path = parent.join(name);

        match kind {
            NodeKind::Folder => {
                self.exec(project_id, &container_id, self.commands.mkdir(&path))
                    .await?;
            }
            NodeKind::File => {
                if !parent.is_root() {
                    self.exec(project_id, &container_id, self.commands.mkdir(parent))
                        .await?;
                }
                self.put_file(
                    project_id,
                    &container_id,
                    parent,
                    name,
                    content.unwrap_or_default(),
                )
                .await?;
            }
        }

        Ok(path)
    }

    /// Rename an entry in place. Returns the new path.
    pub async fn rename_entry(
        &self,
        project_id: &str,
        path: &RelativePath,
        new_name: &EntryName,
    ) -> WorkspaceResult<RelativePath> {
        reject_root(path)?;
        let new_path = path
            .with_file_name(new_name)
            .ok_or_else(|| WorkspaceError::invalid_path("cannot rename the project root"))?;

        let container_id = self.container_id(project_id).await?;
        self.exec(
            project_id,
            &container_id,
            self.commands.rename(path, &new_path),
        )
        .await
        .map_err(|e| match e {
            WorkspaceError::ExecutionFailed(msg) if msg.contains("already exists") => {
                WorkspaceError::invalid_path(format!("{} already exists", new_path))
            }
            other => other,
        })?;
        Ok(new_path)
    }

    /// Delete an entry and, for folders, everything below it.
    pub async fn delete_entry(&self, project_id: &str, path: &RelativePath) -> WorkspaceResult<()> {
        reject_root(path)?;
        let container_id = self.container_id(project_id).await?;
        self.exec(project_id, &container_id, self.commands.delete(path))
            .await?;
        Ok(())
    }

    /// Fail with `ContainerUnavailable`/`ProjectNotFound` unless the project
    /// has a running container.
    pub async fn ensure_available(&self, project_id: &str) -> WorkspaceResult<()> {
        self.container_id(project_id).await.map(|_| ())
    }
}

#[async_trait]
impl FlushSink for WorkspaceService {
    async fn flush(&self, key: &CacheKey, content: &str) -> anyhow::Result<()> {
        self.write_file(&key.project_id, &key.path, content).await?;
        Ok(())
    }
}

fn reject_root(path: &RelativePath) -> WorkspaceResult<()> {
    if path.is_root() {
        return Err(WorkspaceError::invalid_path(
            "operation not allowed on the project root",
        ));
    }
    Ok(())
}

fn split_file_path(path: &RelativePath) -> WorkspaceResult<(RelativePath, EntryName)> {
    let name = path
        .file_name()
        .ok_or_else(|| WorkspaceError::invalid_path("path has no file name"))?;
    let parent = path.parent().unwrap_or_else(RelativePath::root);
    Ok((parent, EntryName::parse(name)?))
}

fn exec_error(project_id: &str, err: ContainerError) -> WorkspaceError {
    if err.is_not_found() || err.is_not_running() {
        return WorkspaceError::unavailable(project_id, err.to_string());
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{
        ContainerConfig, ContainerResult, ExecStream, InteractiveExec, LifecycleConfig,
        LifecycleManager,
    };
    use crate::db::Database;
    use crate::project::{CreateProjectRequest, ProjectRepository};
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Records commands and answers every exec with a fixed stdout.
    #[derive(Default)]
    struct ScriptedRuntime {
        stdout: Mutex<String>,
        fail_exec: Mutex<Option<String>>,
        execs: Mutex<Vec<Vec<String>>>,
        archives: Mutex<Vec<(String, Bytes)>>,
    }

    impl ScriptedRuntime {
        fn execs(&self) -> Vec<Vec<String>> {
            self.execs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntimeApi for ScriptedRuntime {
        async fn create_container(&self, _config: &ContainerConfig) -> ContainerResult<String> {
            Ok("c1".to_string())
        }

        async fn start_container(&self, _id: &str) -> ContainerResult<()> {
            Ok(())
        }

        async fn stop_container(&self, _id: &str, _timeout: Option<u32>) -> ContainerResult<()> {
            Ok(())
        }

        async fn remove_container(&self, _id: &str, _force: bool) -> ContainerResult<()> {
            Ok(())
        }

        async fn container_state_status(&self, _id: &str) -> ContainerResult<Option<String>> {
            Ok(Some("running".to_string()))
        }

        async fn exec_stream(&self, _id: &str, cmd: &[String]) -> ContainerResult<ExecStream> {
            self.execs.lock().unwrap().push(cmd.to_vec());
            if let Some(stderr) = self.fail_exec.lock().unwrap().clone() {
                return Ok(ExecStream::failed(ContainerError::ExecFailed {
                    command: cmd[0].clone(),
                    exit_code: Some(1),
                    stderr,
                }));
            }
            Ok(ExecStream::completed(self.stdout.lock().unwrap().clone()))
        }

        async fn exec_interactive(
            &self,
            _id: &str,
            _cmd: &[String],
        ) -> ContainerResult<InteractiveExec> {
            Err(ContainerError::StreamClosed)
        }

        async fn put_archive(&self, _id: &str, dir: &str, archive: Bytes) -> ContainerResult<()> {
            self.archives
                .lock()
                .unwrap()
                .push((dir.to_string(), archive));
            Ok(())
        }
    }

    async fn setup() -> (WorkspaceService, Arc<ScriptedRuntime>, String) {
        let runtime = Arc::new(ScriptedRuntime::default());
        let db = Database::in_memory().await.unwrap();
        let store = Arc::new(ProjectRepository::new(db.pool().clone()));
        let lifecycle = Arc::new(LifecycleManager::new(
            runtime.clone(),
            LifecycleConfig::default(),
        ));
        let projects = Arc::new(ProjectService::new(store, lifecycle));
        let project = projects
            .create_project(CreateProjectRequest {
                name: "demo".to_string(),
                description: String::new(),
                owner_id: "u1".to_string(),
            })
            .await
            .unwrap();

        let service = WorkspaceService::new(runtime.clone(), projects, "/project");
        (service, runtime, project.id)
    }

    fn rel(path: &str) -> RelativePath {
        RelativePath::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_list_tree_parses_typed_listing() {
        let (service, runtime, project) = setup().await;
        *runtime.stdout.lock().unwrap() =
            "/project/src/\n/project/src/app.js\n/project/Makefile\n".to_string();

        let tree = service.list_tree(&project).await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].kind(), NodeKind::Folder);
        assert_eq!(tree[0].children()[0].path(), "/src/app.js");
        // Typed listing: no trailing slash means file, even without a dot.
        assert_eq!(tree[1].kind(), NodeKind::File);
    }

    #[tokio::test]
    async fn test_read_strips_control_characters() {
        let (service, runtime, project) = setup().await;
        *runtime.stdout.lock().unwrap() = "a\u{1b}[0m\tb\r\n".to_string();

        let content = service.read_file(&project, &rel("/app.js")).await.unwrap();
        assert_eq!(content, "a[0m\tb\r\n");
        assert_eq!(runtime.execs()[0], vec!["cat", "--", "/project/app.js"]);
    }

    #[tokio::test]
    async fn test_large_write_uses_archive() {
        let (service, runtime, project) = setup().await;
        let service = service.with_max_inline_write_bytes(4);

        service
            .write_file(&project, &rel("/src/app.js"), "0123456789")
            .await
            .unwrap();
        assert!(runtime.execs().is_empty());
        let archives = runtime.archives.lock().unwrap();
        assert_eq!(archives[0].0, "/project/src");
    }

    #[tokio::test]
    async fn test_quote_heavy_write_uses_archive() {
        let (service, runtime, project) = setup().await;
        let service = service.with_max_inline_write_bytes(100);

        // 40 bytes raw, 160 once quoted.
        service
            .write_file(&project, &rel("/q.txt"), &"'".repeat(40))
            .await
            .unwrap();
        assert!(runtime.execs().is_empty());
        assert_eq!(runtime.archives.lock().unwrap()[0].0, "/project");
    }

    #[tokio::test]
    async fn test_nul_content_uses_archive() {
        let (service, runtime, project) = setup().await;

        service
            .write_file(&project, &rel("/bin.dat"), "a\0b")
            .await
            .unwrap();
        assert!(runtime.execs().is_empty());

        let archives = runtime.archives.lock().unwrap();
        let mut archive = tar::Archive::new(archives[0].1.as_ref());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut content).unwrap();
        assert_eq!(content, b"a\0b");
    }

    #[tokio::test]
    async fn test_small_write_stays_inline() {
        let (service, runtime, project) = setup().await;

        service
            .write_file(&project, &rel("/a.js"), "it's fine")
            .await
            .unwrap();
        assert_eq!(runtime.execs()[0][0], "sh");
        assert!(runtime.archives.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inline_limit_is_capped() {
        let (service, _, _) = setup().await;
        let service = service.with_max_inline_write_bytes(usize::MAX);
        assert_eq!(service.max_inline_write_bytes, MAX_INLINE_SCRIPT_BYTES);
    }

    #[tokio::test]
    async fn test_create_file_creates_parent_first() {
        let (service, runtime, project) = setup().await;
        let name = EntryName::parse("app.js").unwrap();

        let path = service
            .create_entry(&project, &rel("/src"), &name, NodeKind::File, Some("x"))
            .await
            .unwrap();
        assert_eq!(path.as_str(), "/src/app.js");
        assert_eq!(runtime.execs()[0], vec!["mkdir", "-p", "--", "/project/src"]);
        assert_eq!(runtime.archives.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_root_is_protected() {
        let (service, runtime, project) = setup().await;
        let name = EntryName::parse("x").unwrap();

        assert!(matches!(
            service.delete_entry(&project, &RelativePath::root()).await,
            Err(WorkspaceError::InvalidPath(_))
        ));
        assert!(matches!(
            service
                .rename_entry(&project, &RelativePath::root(), &name)
                .await,
            Err(WorkspaceError::InvalidPath(_))
        ));
        assert!(runtime.execs().is_empty());
    }

    #[tokio::test]
    async fn test_failures_map_to_workspace_errors() {
        let (service, runtime, project) = setup().await;

        assert!(matches!(
            service.list_tree("missing").await,
            Err(WorkspaceError::ProjectNotFound(_))
        ));

        *runtime.fail_exec.lock().unwrap() = Some("mv: cannot stat".to_string());
        let err = service
            .rename_entry(&project, &rel("/a.js"), &EntryName::parse("b.js").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::ExecutionFailed(ref msg) if msg.contains("cannot stat")));

        *runtime.fail_exec.lock().unwrap() = Some("mv: '/project/b.js' already exists".to_string());
        let err = service
            .rename_entry(&project, &rel("/a.js"), &EntryName::parse("b.js").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPath(ref msg) if msg.contains("/b.js")));

        *runtime.fail_exec.lock().unwrap() = Some("Error: container c1 is not running".to_string());
        let err = service.delete_entry(&project, &rel("/a.js")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::ContainerUnavailable { .. }));
    }
}
