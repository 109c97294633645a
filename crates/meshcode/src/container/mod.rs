//! Container runtime management module.
//!
//! Provides an async interface to manage project containers via the Docker or
//! Podman CLI. The runtime is auto-detected or can be configured explicitly.
//! All in-container commands go through [`ContainerRuntimeApi`], which is the
//! single execution chokepoint of the workspace.

mod container;
mod error;
pub(crate) mod exec;
mod lifecycle;

pub use container::{
    ContainerConfig, validate_container_id_or_name, validate_container_path,
    validate_image_name,
};
pub use error::{ContainerError, ContainerResult};
pub use exec::{ExecChunk, ExecOutput, ExecStream, InteractiveExec, KillSwitch};
pub use lifecycle::{
    ContainerHandle, HandleState, LifecycleConfig, LifecycleManager, PROJECT_ID_ENV,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    #[default]
    Docker,
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Container runtime client for managing containers.
///
/// Supports both Docker and Podman with automatic detection.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    /// The runtime type (docker or podman)
    runtime_type: RuntimeType,
    /// Path to the container binary
    binary: String,
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;
    async fn start_container(&self, container_id: &str) -> ContainerResult<()>;
    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;
    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()>;

    /// State status string (e.g. "running", "exited"); `None` when missing.
    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>>;

    /// Run a command in the container, streaming its output.
    async fn exec_stream(&self, container_id: &str, command: &[String])
    -> ContainerResult<ExecStream>;

    /// Run a command with stdin attached for interactive use.
    async fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<InteractiveExec>;

    /// Extract a tar archive into `dest_dir` inside the container.
    async fn put_archive(
        &self,
        container_id: &str,
        dest_dir: &str,
        archive: Bytes,
    ) -> ContainerResult<()>;

    /// Run a command to completion and collect its output.
    async fn exec_output(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<ExecOutput> {
        self.exec_stream(container_id, command)
            .await?
            .collect_output()
            .await
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        self.create_container(config).await
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.start_container(container_id).await
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        self.stop_container(container_id, timeout_seconds).await
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        self.remove_container(container_id, force).await
    }

    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        self.container_state_status(id_or_name).await
    }

    async fn exec_stream(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<ExecStream> {
        self.exec_stream(container_id, command)
    }

    async fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<InteractiveExec> {
        self.exec_interactive(container_id, command)
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_dir: &str,
        archive: Bytes,
    ) -> ContainerResult<()> {
        self.put_archive(container_id, dest_dir, archive).await
    }
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Tries Docker first, then falls back to Podman.
    pub fn new() -> Self {
        if Self::is_binary_available("docker") {
            Self::with_type(RuntimeType::Docker)
        } else if Self::is_binary_available("podman") {
            Self::with_type(RuntimeType::Podman)
        } else {
            // Fall back to docker, will fail at runtime
            Self::with_type(RuntimeType::Docker)
        }
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check if a binary is available in PATH.
    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run the runtime CLI to completion, mapping failures to `CommandFailed`.
    async fn run_cli(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check if the container runtime is available and working.
    pub async fn health_check(&self) -> ContainerResult<String> {
        self.run_cli(
            "version",
            &["version".to_string(), "--format".to_string(), "json".to_string()],
        )
        .await
    }

    /// Create a new container without starting it.
    ///
    /// The configuration is validated first so nothing unchecked reaches the CLI.
    pub async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;
        let stdout = self.run_cli("create", &config.create_args()).await?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(ContainerError::CommandFailed {
                command: "create".to_string(),
                message: "runtime returned an empty container id".to_string(),
            });
        }
        Ok(id)
    }

    /// Start a created or stopped container.
    pub async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;
        self.run_cli("start", &["start".to_string(), container_id.to_string()])
            .await
            .map(|_| ())
    }

    /// Stop a running container.
    pub async fn stop_container(
        &self,
        container_id: &str,
        timeout: Option<u32>,
    ) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["stop".to_string()];
        if let Some(t) = timeout {
            args.push("-t".to_string());
            args.push(t.to_string());
        }
        args.push(container_id.to_string());

        self.run_cli("stop", &args).await.map(|_| ())
    }

    /// Remove a container.
    pub async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(container_id.to_string());

        self.run_cli("rm", &args).await.map(|_| ())
    }

    /// Get the container state status string (e.g. "running", "exited") via `inspect`.
    ///
    /// Returns `Ok(None)` when the container does not exist.
    pub async fn container_state_status(
        &self,
        id_or_name: &str,
    ) -> ContainerResult<Option<String>> {
        validate_container_id_or_name(id_or_name)?;

        let output = Command::new(&self.binary)
            .args(["inspect", "--format", "{{.State.Status}}", id_or_name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "inspect".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            // Container not found is not an error; callers treat it as missing.
            return Ok(None);
        }

        let status = String::from_utf8_lossy(&output.stdout)
            .trim()
            .trim_matches('"')
            .to_string();
        if status.is_empty() {
            return Ok(None);
        }

        Ok(Some(status))
    }

    /// Execute a command in a container, streaming stdout and stderr.
    ///
    /// This runs `docker exec <id> <command...>` without a shell, so arguments
    /// are passed to the process verbatim.
    pub fn exec_stream(&self, container_id: &str, command: &[String]) -> ContainerResult<ExecStream> {
        validate_container_id_or_name(container_id)?;
        if command.is_empty() {
            return Err(ContainerError::InvalidInput(
                "exec command cannot be empty".to_string(),
            ));
        }

        let child = Command::new(&self.binary)
            .arg("exec")
            .arg(container_id)
            .args(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ContainerError::CommandFailed {
                command: "exec".to_string(),
                message: e.to_string(),
            })?;

        Ok(exec::stream_child(child, command[0].clone()))
    }

    /// Execute a command with stdin attached (`docker exec -i`).
    pub fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
    ) -> ContainerResult<InteractiveExec> {
        validate_container_id_or_name(container_id)?;
        if command.is_empty() {
            return Err(ContainerError::InvalidInput(
                "exec command cannot be empty".to_string(),
            ));
        }

        let child = Command::new(&self.binary)
            .args(["exec", "-i"])
            .arg(container_id)
            .args(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ContainerError::CommandFailed {
                command: "exec".to_string(),
                message: e.to_string(),
            })?;

        Ok(exec::interactive_child(child, command[0].clone()))
    }

    /// Extract a tar archive into a directory of the container.
    ///
    /// Uses `docker cp - <id>:<dir>`, which reads the archive from stdin.
    pub async fn put_archive(
        &self,
        container_id: &str,
        dest_dir: &str,
        archive: Bytes,
    ) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;
        validate_container_path(dest_dir)?;

        let mut child = Command::new(&self.binary)
            .arg("cp")
            .arg("-")
            .arg(format!("{}:{}", container_id, dest_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ContainerError::CommandFailed {
                command: "cp".to_string(),
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&archive).await?;
            stdin.shutdown().await?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "cp".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "cp".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_container_runtime_health_check() {
        let runtime = ContainerRuntime::new();
        // This test will only pass if docker or podman is installed
        if let Ok(version) = runtime.health_check().await {
            assert!(!version.is_empty());
        }
    }

    #[test]
    fn test_runtime_type_binaries() {
        assert_eq!(RuntimeType::Docker.default_binary(), "docker");
        assert_eq!(RuntimeType::Podman.default_binary(), "podman");
        assert_eq!(RuntimeType::Podman.to_string(), "podman");
    }

    #[tokio::test]
    async fn test_exec_rejects_bad_container_id() {
        let runtime = ContainerRuntime::with_type(RuntimeType::Docker);
        let err = runtime
            .exec_stream("abc; rm -rf /", &["ls".to_string()])
            .unwrap_err();
        assert!(matches!(err, ContainerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_exec_rejects_empty_command() {
        let runtime = ContainerRuntime::with_type(RuntimeType::Docker);
        let err = runtime.exec_stream("abc123", &[]).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidInput(_)));
    }
}
