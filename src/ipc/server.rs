//! Local control server for `editlink-ctl`.
//!
//! Listens on `<endpoint>-ctl` and turns line-delimited JSON commands into
//! user actions on the dispatcher. Notifications produced by an action are
//! delivered to the originating driver exactly as if the action had come
//! from an editor UI.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list", "auth_token": "..."}
//! {"command": "show", "file": "src/a.py", "auth_token": "..."}
//! {"command": "accept", "file": "src/a.py", "auth_token": "..."}
//! {"command": "reject-edit", "file": "src/a.py", "index": 1, "auth_token": "..."}
//! ```
//!
//! When the context carries a token, every request must present it.
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: no pending proposal for /ws/a.py"}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::dispatcher::{Action, Dispatcher, Outcome};
use crate::host::SessionDirectory;
use crate::models::Proposal;
use crate::surface::EditingSurface;
use crate::{AppError, Result};

/// What the control server acts on.
pub struct ControlContext<S> {
    /// Dispatcher shared with the editor host.
    pub dispatcher: Arc<Dispatcher<S>>,
    /// Sessions notifications are delivered to.
    pub sessions: Arc<SessionDirectory>,
    /// Shared secret requests must carry, if any.
    pub auth_token: Option<String>,
}

/// Inbound request from `editlink-ctl`.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Target file (all commands but `list`).
    file: Option<PathBuf>,
    /// Edit index (for `accept-edit`, `reject-edit`).
    index: Option<usize>,
    /// Shared secret from the host's rendezvous record.
    auth_token: Option<String>,
}

/// Outbound response to `editlink-ctl`.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the control server task.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener cannot be created.
pub fn spawn_control_server<S: EditingSurface + 'static>(
    ctx: Arc<ControlContext<S>>,
    name: &str,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Transport(format!("invalid control socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Transport(format!("failed to create control listener: {err}")))?;

    info!(control_name = %name, "control server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("control_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("control server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, Arc::clone(&ctx)));
                            }
                            Err(err) => {
                                warn!(%err, "control accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single control client connection.
async fn handle_connection<S: EditingSurface>(
    stream: interprocess::local_socket::tokio::Stream,
    ctx: Arc<ControlContext<S>>,
) {
    let span = info_span!("control_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &ctx).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write control response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "control read error");
                    break;
                }
            }
        }

        info!("control connection closed");
    }
    .instrument(span)
    .await;
}

/// Route a control command to the dispatcher.
async fn dispatch_command<S: EditingSurface>(
    request: &IpcRequest,
    ctx: &ControlContext<S>,
) -> IpcResponse {
    if let Some(ref expected) = ctx.auth_token {
        match request.auth_token {
            Some(ref provided) if provided == expected => {}
            _ => {
                warn!(command = %request.command, "control request rejected: invalid auth token");
                return IpcResponse::error("unauthorized");
            }
        }
    }

    if request.command == "list" {
        return handle_list(ctx).await;
    }

    let Some(file) = request.file.clone() else {
        return IpcResponse::error("missing required 'file' field");
    };
    let action = match request.command.as_str() {
        "show" => return handle_show(file, ctx).await,
        "accept" => Action::AcceptAll { file },
        "reject" => Action::RejectAll { file },
        "close" => Action::CloseDiff { file },
        "accept-edit" | "reject-edit" => {
            let Some(index) = request.index else {
                return IpcResponse::error("missing required 'index' field");
            };
            if request.command == "accept-edit" {
                Action::AcceptEdit { file, index }
            } else {
                Action::RejectEdit { file, index }
            }
        }
        other => return IpcResponse::error(format!("unknown command: {other}")),
    };

    let outcome = ctx.dispatcher.dispatch(action).await;
    respond(outcome, &ctx.sessions).await
}

/// Deliver notifications, then report the outcome.
async fn respond(outcome: Outcome, sessions: &SessionDirectory) -> IpcResponse {
    let Outcome {
        file,
        state,
        notifications,
        error,
    } = outcome;
    let notified = notifications.len();
    sessions.deliver(notifications).await;
    match error {
        Some(err) => IpcResponse::error(err.to_string()),
        None => IpcResponse::success(serde_json::json!({
            "file": file,
            "state": state,
            "notified": notified,
        })),
    }
}

/// List pending proposals.
async fn handle_list<S: EditingSurface>(ctx: &ControlContext<S>) -> IpcResponse {
    let items: Vec<serde_json::Value> = ctx
        .dispatcher
        .list()
        .await
        .iter()
        .map(summarize)
        .collect();
    IpcResponse::success(serde_json::json!({ "proposals": items }))
}

/// Show one proposal with its annotations.
async fn handle_show<S: EditingSurface>(file: PathBuf, ctx: &ControlContext<S>) -> IpcResponse {
    let Some(view) = ctx.dispatcher.show(&file).await else {
        return IpcResponse::error(format!("no pending proposal for {}", file.display()));
    };
    IpcResponse::success(serde_json::json!({
        "proposal": summarize(&view.proposal),
        "edits": view.proposal.edits,
        "statuses": view.proposal.statuses,
        "annotations": view.annotations,
    }))
}

fn summarize(proposal: &Proposal) -> serde_json::Value {
    serde_json::json!({
        "id": proposal.id,
        "file": proposal.file,
        "description": proposal.description,
        "state": proposal.state(),
        "edits": proposal.edits.len(),
        "pending": proposal.pending_indices(),
        "origin": proposal.origin,
        "created_at": proposal.created_at.to_rfc3339(),
    })
}
