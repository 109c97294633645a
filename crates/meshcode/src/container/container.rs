//! Container configuration and input validation.

use std::collections::BTreeMap;

use super::error::{ContainerError, ContainerResult};

/// Configuration for creating a new container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name (optional).
    pub name: Option<String>,
    /// Docker/OCI image to use.
    pub image: String,
    /// Command to run.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Labels for the container.
    pub labels: BTreeMap<String, String>,
    /// Allocate a pseudo-TTY so an idle shell keeps the container alive.
    pub tty: bool,
}

impl ContainerConfig {
    /// Create a new container config with the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate all container configuration fields.
    ///
    /// Called by the runtime before anything is handed to the CLI.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_container_name(name)?;
        }

        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }

        for key in self.labels.keys() {
            validate_label_key(key)?;
        }

        if let Some(ref workdir) = self.workdir {
            validate_container_path(workdir)?;
        }

        Ok(())
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the command to run.
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Build the argument list for `<runtime> create`.
    pub(crate) fn create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if let Some(ref name) = self.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }

        if self.tty {
            args.push("-t".to_string());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(ref workdir) = self.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

// ============================================================================
// Input Validation Functions
// ============================================================================

/// Validate a Docker/OCI image name.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`
/// Valid characters: alphanumeric, `.`, `-`, `_`, `/`, `:`, `@`
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters; only alphanumeric, '.', '-', '_', '/', ':', '@' are allowed",
            image
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container name.
///
/// Container names must be alphanumeric with hyphens and underscores and
/// start with an alphanumeric character or underscore.
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    };

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphanumeric() && first_char != '_' {
        return Err(ContainerError::InvalidInput(
            "container name must start with an alphanumeric character or underscore".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{}' contains invalid characters; only alphanumeric, '-', '_' are allowed",
            name
        )));
    }

    Ok(())
}

/// Validate a container ID or name passed to lifecycle and exec calls.
///
/// Container IDs are hex strings, names are alphanumeric with `-` and `_`.
pub fn validate_container_id_or_name(id: &str) -> ContainerResult<()> {
    if id.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container ID or name cannot be empty".to_string(),
        ));
    }

    if id.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container ID or name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container ID or name '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}

/// Validate an environment variable key (POSIX: letters, digits, underscore).
fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    let Some(first_char) = key.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    };

    if key.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "environment variable key exceeds maximum length of 256 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters; only alphanumeric and '_' are allowed",
            key
        )));
    }

    Ok(())
}

fn validate_label_key(key: &str) -> ContainerResult<()> {
    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';
    if key.is_empty() || !key.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "label key '{}' is invalid",
            key
        )));
    }
    Ok(())
}

/// Validate a container-internal path.
pub fn validate_container_path(path: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container path cannot be empty".to_string(),
        ));
    }

    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(
            "container path must be absolute (start with '/')".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(ContainerError::InvalidInput(
            "container path cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}
