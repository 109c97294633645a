//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceExt;

use meshcode::api::{self, AppState, StateConfig};
use meshcode::container::{
    ContainerConfig, ContainerError, ContainerResult, ContainerRuntimeApi, ExecChunk, ExecStream,
    HandleState, InteractiveExec, KillSwitch,
};
use meshcode::db::Database;
use meshcode::flush::FlushConfig;
use meshcode::project::{ProjectRepository, ProjectStore};

pub const PROJECT_ROOT: &str = "/project";

/// Inactivity window used by the integration tests.
pub const TEST_FLUSH_WINDOW: Duration = Duration::from_millis(150);

#[derive(Debug, Default)]
struct FakeContainer {
    running: bool,
    /// Absolute path to file content; `None` marks a directory.
    files: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    commands: Vec<Vec<String>>,
    archives: Vec<String>,
}

/// In-memory container runtime.
///
/// Interprets the file commands the workspace issues against a per-container
/// map of paths, so tests can inspect what actually reached the container.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    /// When set, every `cat` waits for a permit before running.
    read_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every exec argv in arrival order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Destination directories of every archive upload.
    pub fn archives(&self) -> Vec<String> {
        self.state.lock().unwrap().archives.clone()
    }

    /// Execs plus archive uploads.
    pub fn operation_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.commands.len() + state.archives.len()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.commands.clear();
        state.archives.clear();
    }

    /// Put a file into a container, creating parent directories.
    pub fn seed_file(&self, container_id: &str, path: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        let container = state.containers.get_mut(container_id).unwrap();
        let abs = format!("{}{}", PROJECT_ROOT, path);
        insert_parents(&mut container.files, &abs);
        container
            .files
            .insert(abs, Some(content.to_string()));
    }

    /// Content of a file inside a container, by project-relative path.
    pub fn file(&self, container_id: &str, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let abs = format!("{}{}", PROJECT_ROOT, path);
        state
            .containers
            .get(container_id)
            .and_then(|c| c.files.get(&abs).cloned())
            .flatten()
    }

    /// Whether a path exists (file or directory).
    pub fn exists(&self, container_id: &str, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        let abs = format!("{}{}", PROJECT_ROOT, path);
        state
            .containers
            .get(container_id)
            .is_some_and(|c| c.files.contains_key(&abs))
    }

    /// Number of entries below the project root.
    pub fn entry_count(&self, container_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(container_id)
            .map(|c| c.files.len())
            .unwrap_or(0)
    }

    /// Hold every file read until a permit is added to the returned gate.
    pub fn gate_reads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.read_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Stop a container behind the service's back.
    pub fn stop(&self, container_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.get_mut(container_id) {
            container.running = false;
        }
    }

    fn run(&self, container_id: &str, command: &[String]) -> Result<String, ContainerError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_vec());

        let container = match state.containers.get_mut(container_id) {
            Some(c) => c,
            None => {
                return Err(exec_failed(
                    command,
                    &format!("Error: No such container: {}", container_id),
                ));
            }
        };
        if !container.running {
            return Err(exec_failed(
                command,
                &format!(
                    "Error response from daemon: container {} is not running",
                    container_id
                ),
            ));
        }

        let args: Vec<&str> = command.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["find", root, ..] => {
                let prefix = format!("{}/", root.trim_end_matches('/'));
                let mut out = String::new();
                for (path, content) in &container.files {
                    if !path.starts_with(&prefix) {
                        continue;
                    }
                    out.push_str(path);
                    if content.is_none() {
                        out.push('/');
                    }
                    out.push('\n');
                }
                Ok(out)
            }
            ["cat", "--", path] => match container.files.get(*path) {
                Some(Some(content)) => Ok(content.clone()),
                Some(None) => Err(exec_failed(command, &format!("cat: {}: Is a directory", path))),
                None => Err(exec_failed(
                    command,
                    &format!("cat: {}: No such file or directory", path),
                )),
            },
            ["sh", "-c", script] => {
                let (content, path) = parse_inline_write(script)
                    .ok_or_else(|| exec_failed(command, "sh: unsupported script"))?;
                container.files.insert(path, Some(content));
                Ok(String::new())
            }
            ["mkdir", "-p", "--", path] => {
                insert_parents(&mut container.files, path);
                container.files.entry(path.to_string()).or_insert(None);
                Ok(String::new())
            }
            ["sh", "-c", _, "mv", from, to] => {
                if container.files.contains_key(*to) {
                    return Err(exec_failed(command, &format!("mv: '{}' already exists", to)));
                }
                let moved: Vec<(String, Option<String>)> = container
                    .files
                    .iter()
                    .filter(|(p, _)| under(p, from))
                    .map(|(p, c)| (p.clone(), c.clone()))
                    .collect();
                if moved.is_empty() {
                    return Err(exec_failed(
                        command,
                        &format!("mv: cannot stat '{}': No such file or directory", from),
                    ));
                }
                for (path, content) in moved {
                    container.files.remove(&path);
                    let new_path = format!("{}{}", to, &path[from.len()..]);
                    container.files.insert(new_path, content);
                }
                Ok(String::new())
            }
            ["rm", "-rf", "--", path] => {
                container.files.retain(|p, _| !under(p, path));
                Ok(String::new())
            }
            _ => Err(exec_failed(command, "unsupported command")),
        }
    }
}

#[async_trait]
impl ContainerRuntimeApi for FakeRuntime {
    async fn create_container(&self, _config: &ContainerConfig) -> ContainerResult<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(id.clone(), FakeContainer::default());
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(container_id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(ContainerError::ContainerNotFound(container_id.to_string())),
        }
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(container_id) {
            Some(container) => {
                container.running = false;
                Ok(())
            }
            None => Err(ContainerError::ContainerNotFound(container_id.to_string())),
        }
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.containers.remove(container_id);
        Ok(())
    }

    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(id_or_name).map(|c| {
            if c.running {
                "running".to_string()
            } else {
                "exited".to_string()
            }
        }))
    }

    async fn exec_stream(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<ExecStream> {
        if command.first().map(String::as_str) == Some("cat") {
            let gate = self.read_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
        }
        Ok(match self.run(container_id, command) {
            Ok(stdout) => ExecStream::completed(stdout),
            Err(e) => ExecStream::failed(e),
        })
    }

    /// Echoes input back as output until killed.
    async fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<InteractiveExec> {
        {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.to_vec());
            if !state
                .containers
                .get(container_id)
                .is_some_and(|c| c.running)
            {
                return Err(ContainerError::ContainerNotFound(container_id.to_string()));
            }
        }

        let (out_tx, out_rx) = mpsc::channel::<ContainerResult<ExecChunk>>(16);
        let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(16);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut kill_rx => break,
                    input = in_rx.recv() => match input {
                        Some(bytes) if &bytes[..] == b"exit\n" => break,
                        Some(bytes) => {
                            if out_tx.send(Ok(ExecChunk::Stdout(bytes))).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(InteractiveExec::new(
            in_tx,
            ExecStream::new(ReceiverStream::new(out_rx)),
            KillSwitch::new(kill_tx),
        ))
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_dir: &str,
        archive: Bytes,
    ) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.archives.push(dest_dir.to_string());

        let container = state
            .containers
            .get_mut(container_id)
            .filter(|c| c.running)
            .ok_or_else(|| ContainerError::CommandFailed {
                command: "cp".to_string(),
                message: format!("container {} is not running", container_id),
            })?;

        let mut reader = tar::Archive::new(archive.as_ref());
        for entry in reader.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            let path = format!("{}/{}", dest_dir.trim_end_matches('/'), name);
            insert_parents(&mut container.files, &path);
            container.files.insert(path, Some(content));
        }
        Ok(())
    }
}

fn exec_failed(command: &[String], stderr: &str) -> ContainerError {
    ContainerError::ExecFailed {
        command: command.first().cloned().unwrap_or_default(),
        exit_code: Some(1),
        stderr: stderr.to_string(),
    }
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Register every ancestor directory of `path` below the project root.
fn insert_parents(files: &mut BTreeMap<String, Option<String>>, path: &str) {
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        current.push('/');
        current.push_str(segment);
        if current.len() > PROJECT_ROOT.len() && current.starts_with(PROJECT_ROOT) {
            files.entry(current.clone()).or_insert(None);
        }
    }
}

/// Undo `printf '%s' <quoted> > <quoted>`.
fn parse_inline_write(script: &str) -> Option<(String, String)> {
    let rest = script.strip_prefix("printf '%s' ")?;
    let (content, rest) = unquote(rest)?;
    let rest = rest.strip_prefix(" > ")?;
    let (path, rest) = unquote(rest)?;
    rest.is_empty().then_some((content, path))
}

/// Read one single-quoted shell word, including `'\''` escapes.
fn unquote(input: &str) -> Option<(String, &str)> {
    let mut rest = input.strip_prefix('\'')?;
    let mut out = String::new();
    loop {
        let end = rest.find('\'')?;
        out.push_str(&rest[..end]);
        rest = &rest[end + 1..];
        match rest.strip_prefix("\\''") {
            Some(next) => {
                out.push('\'');
                rest = next;
            }
            None => return Some((out, rest)),
        }
    }
}

/// A wired application on top of [`FakeRuntime`].
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub runtime: Arc<FakeRuntime>,
    pub store: Arc<ProjectRepository>,
}

pub fn test_config() -> StateConfig {
    StateConfig {
        flush: FlushConfig {
            window: TEST_FLUSH_WINDOW,
            max_attempts: 2,
            retry_backoff: Duration::from_millis(20),
        },
        ..StateConfig::default()
    }
}

/// Create a test application with all services initialized.
pub async fn test_app() -> TestApp {
    test_app_with(test_config()).await
}

pub async fn test_app_with(config: StateConfig) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let store = Arc::new(ProjectRepository::new(db.pool().clone()));

    let state = AppState::new(runtime.clone(), store.clone(), config);
    TestApp {
        router: api::create_router(state.clone()),
        state,
        runtime,
        store,
    }
}

impl TestApp {
    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Create a project through the API; returns `(project_id, container_id)`.
    pub async fn create_project(&self, name: &str) -> (String, String) {
        let (status, json) = self
            .request(
                Method::POST,
                "/projects",
                Some(serde_json::json!({ "name": name, "ownerId": "u1" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        (
            json["id"].as_str().unwrap().to_string(),
            json["container_id"].as_str().unwrap().to_string(),
        )
    }

    /// Record a container state without touching the runtime.
    pub async fn set_recorded_state(&self, project_id: &str, state: HandleState) {
        self.store
            .set_container_state(project_id, state)
            .await
            .unwrap();
    }
}
