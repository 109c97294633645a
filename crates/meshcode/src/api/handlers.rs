//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::project::{CreateProjectRequest, Project};
use crate::workspace::{FileSystemNode, NodeKind, RelativePath, WorkspaceError};

use super::error::ApiResult;
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    #[serde(default)]
    pub owner: Option<String>,
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListProjectsQuery>,
) -> ApiResult<Json<Vec<Project>>> {
    let projects = state.projects.list_projects(query.owner.as_deref()).await?;
    Ok(Json(projects))
}

/// Create a project and provision its container.
#[instrument(skip(state, request), fields(name = %request.name))]
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state.projects.create_project(request).await?;
    info!(project_id = %project.id, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.projects.get_project(&project_id).await?))
}

/// Ensure the project has a running container.
#[instrument(skip(state))]
pub async fn provision_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.projects.provision(&project_id).await?))
}

/// Tear down the container, delete the record and forget cached files.
#[instrument(skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.projects.delete_project(&project_id).await?;
    state.collab.purge_project(&project_id).await;
    info!("Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

pub async fn list_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<FileSystemNode>>> {
    Ok(Json(state.collab.list_tree(&project_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    #[serde(default)]
    pub parent_path: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub path: String,
}

/// Create a file or folder.
#[instrument(skip(state, request))]
pub async fn create_entry(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateEntryRequest>,
) -> ApiResult<(StatusCode, Json<EntryResponse>)> {
    let path = state
        .collab
        .create_entry(
            &project_id,
            request.parent_path.as_deref(),
            &request.name,
            request.kind,
            request.content.as_deref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(EntryResponse {
            path: path.to_string(),
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<StatusCode> {
    state.collab.delete_entry(&project_id, &query.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub new_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponse {
    pub path: String,
    pub new_path: String,
}

#[instrument(skip(state, request))]
pub async fn rename_entry(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<RenameResponse>> {
    let path = RelativePath::parse(&query.path)?;
    let new_path = state
        .collab
        .rename_entry(&project_id, path.as_str(), &request.new_name)
        .await?;
    Ok(Json(RenameResponse {
        path: path.to_string(),
        new_path: new_path.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
}

/// File content, served from the edit cache when present.
pub async fn read_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContentResponse>> {
    let path = RelativePath::parse(&query.path)?;
    let content = state.collab.read_content(&project_id, &path).await?;
    Ok(Json(FileContentResponse {
        path: path.to_string(),
        content,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    pub content: String,
}

/// Write a file through to the container.
#[instrument(skip(state, request))]
pub async fn save_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
    Json(request): Json<SaveFileRequest>,
) -> ApiResult<StatusCode> {
    state
        .collab
        .save_file(&project_id, &query.path, request.content)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub notified: usize,
}

/// Ask every client of the project to reload its tree.
pub async fn notify_file_change(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<NotifyResponse>> {
    if !state.projects.exists(&project_id).await? {
        return Err(WorkspaceError::ProjectNotFound(project_id).into());
    }
    let notified = state.collab.notify_refresh(&project_id);
    Ok(Json(NotifyResponse { notified }))
}
