//! WebSocket handler for client connections.

use std::time::Duration;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::api::{ApiError, AppState};
use crate::terminal::TerminalSession;

use super::hub::ConnectionId;
use super::types::{WsCommand, WsEvent};

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// GET /ws?user_id=<id>
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = query
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing user_id"))?;
    info!("WebSocket upgrade request from user {}", user_id);

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, user_id)))
}

/// Handle a WebSocket connection.
async fn handle_ws_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let hub = state.hub.clone();

    let (conn_id, mut event_rx) = hub.register(&user_id);
    hub.send_to(conn_id, WsEvent::Connected);

    // Spawn task to send events to client
    let send_task = tokio::spawn(async move {
        let period = Duration::from_secs(PING_INTERVAL_SECS);
        let mut ping_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            let event = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = ping_interval.tick() => WsEvent::Ping,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut terminal: Option<TerminalSession> = None;

    // Process incoming messages
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsCommand>(text.as_str()) {
                Ok(cmd) => {
                    let is_terminal = matches!(
                        cmd,
                        WsCommand::StartTerminal { .. } | WsCommand::TerminalInput { .. }
                    );
                    if let Err(e) = handle_command(&state, conn_id, cmd, &mut terminal).await {
                        warn!("Failed to handle command from user {}: {:#}", user_id, e);
                        let message = format!("{:#}", e);
                        let event = if is_terminal {
                            WsEvent::TerminalError { message }
                        } else {
                            WsEvent::error(message)
                        };
                        hub.send_to(conn_id, event);
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command from user {}: {}", user_id, e);
                    hub.send_to(conn_id, WsEvent::error(format!("invalid command: {}", e)));
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message from user {}, ignoring", user_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("User {} closed WebSocket connection", user_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error for user {}: {}", user_id, e);
                break;
            }
        }
    }

    // Clean up
    if let Some(session) = terminal.take() {
        session.terminate();
    }
    hub.unregister(conn_id);
    send_task.abort();
    info!("WebSocket connection closed for user {}", user_id);
}

/// Handle a command from a client.
async fn handle_command(
    state: &AppState,
    conn_id: ConnectionId,
    cmd: WsCommand,
    terminal: &mut Option<TerminalSession>,
) -> anyhow::Result<()> {
    let collab = &state.collab;

    match cmd {
        WsCommand::Pong => {}

        WsCommand::JoinProject { project } => collab.join_project(conn_id, &project).await?,

        WsCommand::JoinFile { project, path } => {
            collab.join_file(conn_id, &project, &path).await?;
        }

        WsCommand::LeaveFile { project, path } => collab.leave_file(conn_id, &project, &path)?,

        WsCommand::EditFile {
            project,
            path,
            content,
        } => {
            collab
                .edit_file(Some(conn_id), &project, &path, content)
                .await?;
        }

        WsCommand::CreateFile {
            project,
            parent_path,
            name,
            kind,
            content,
        } => {
            collab
                .create_entry(
                    &project,
                    parent_path.as_deref(),
                    &name,
                    kind,
                    content.as_deref(),
                )
                .await?;
        }

        WsCommand::RenameFile {
            project,
            path,
            new_name,
        } => {
            collab.rename_entry(&project, &path, &new_name).await?;
        }

        WsCommand::DeleteFile { project, path } => collab.delete_entry(&project, &path).await?,

        WsCommand::FileMetadataChanged {
            project,
            old_path,
            new_path,
            new_name,
        } => {
            collab.relay_metadata(conn_id, &project, &old_path, &new_path, &new_name)?;
        }

        WsCommand::StartTerminal {
            container_handle,
            project,
        } => {
            let container_id =
                resolve_terminal_container(state, container_handle.as_deref(), project.as_deref())
                    .await?;

            // One shell per connection; a new start replaces the old one.
            if let Some(old) = terminal.take() {
                old.terminate();
            }
            let session = state
                .terminals
                .open(&container_id, state.hub.clone(), conn_id)
                .await?;
            *terminal = Some(session);
        }

        WsCommand::TerminalInput { data } => match terminal.as_ref() {
            Some(session) => session.write(data).await?,
            None => anyhow::bail!("no terminal session"),
        },
    }

    Ok(())
}

/// Find the running container a terminal should attach to.
///
/// A raw container handle is only accepted when it is the current container
/// of a known project.
async fn resolve_terminal_container(
    state: &AppState,
    container_handle: Option<&str>,
    project: Option<&str>,
) -> anyhow::Result<String> {
    let project_id = match (container_handle, project) {
        (Some(handle), _) => match state.projects.project_for_container(handle).await? {
            Some(project) => project.id,
            None => {
                error!("Terminal requested for unknown container {}", handle);
                anyhow::bail!("unknown container {}", handle);
            }
        },
        (None, Some(project)) => project.to_string(),
        (None, None) => anyhow::bail!("containerHandle or project is required"),
    };

    let handle = state.projects.container_handle(&project_id).await?;
    Ok(handle.id)
}
