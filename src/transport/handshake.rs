//! Session handshake.
//!
//! 1. The connecting side writes `connect{clientVersion, authToken}`.
//! 2. The listening side checks the token and answers
//!    `connected{serverVersion, capabilities}`, or `error{unauthorized}`
//!    followed by closing the stream.
//!
//! Either side gives up after the configured timeout, so a peer that
//! connects and then hangs cannot block the other forever. Nothing else may
//! be exchanged before the handshake completes.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::models::PeerIdentity;
use crate::transport::codec::{EnvelopeCodec, Frame};
use crate::transport::envelope::{parse_inbound_line, Envelope, PROTOCOL_VERSION};
use crate::{AppError, Result};

/// What the listening side tells connectors about itself.
#[derive(Debug, Clone)]
pub struct ServerHello {
    /// Display name of the editor.
    pub peer_name: String,
    /// Random identifier of this editor instance.
    pub instance_id: String,
    /// Message kinds this side handles.
    pub capabilities: Vec<String>,
    /// Token connectors must present. `None` accepts any connector.
    pub auth_token: Option<String>,
}

/// What the connecting side tells the listener about itself.
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    /// Connector's process id.
    pub process_id: Option<u32>,
    /// Workspace roots the connector operates in.
    pub workspace_roots: Vec<PathBuf>,
    /// Token the host published alongside its endpoint.
    pub auth_token: Option<String>,
}

/// Result of a completed handshake.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Identity of the remote peer.
    pub peer: PeerIdentity,
    /// Capabilities the listener offered.
    pub capabilities: Vec<String>,
}

/// Run the connecting side of the handshake.
///
/// # Errors
///
/// Returns `AppError::Transport` on timeout, EOF, an `error` reply, or any
/// first reply other than `connected`.
pub async fn client_handshake<R, W>(
    reader: &mut FramedRead<R, EnvelopeCodec>,
    writer: &mut FramedWrite<W, EnvelopeCodec>,
    hello: &ClientHello,
    timeout: Duration,
) -> Result<Negotiated>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let connect = Envelope::Connect {
        client_version: PROTOCOL_VERSION.to_owned(),
        process_id: hello.process_id,
        workspace_roots: hello.workspace_roots.clone(),
        auth_token: hello.auth_token.clone(),
    };
    writer
        .send(connect.to_line()?)
        .await
        .map_err(|err| AppError::Transport(format!("failed to send connect: {err}")))?;

    match first_envelope(reader, timeout).await? {
        Envelope::Connected {
            server_version,
            capabilities,
            peer_name,
            instance_id,
        } => {
            debug!(%server_version, ?capabilities, "handshake: connected received");
            Ok(Negotiated {
                peer: PeerIdentity::Editor {
                    instance_id: instance_id.unwrap_or_default(),
                    peer_name: peer_name.unwrap_or_else(|| "editor".into()),
                    server_version,
                },
                capabilities,
            })
        }
        Envelope::Error { message, code, .. } if code == "unauthorized" => {
            Err(AppError::Unauthorized(message))
        }
        Envelope::Error { message, code, .. } => Err(AppError::Transport(format!(
            "peer refused connection ({code}): {message}"
        ))),
        other => Err(AppError::Transport(format!(
            "expected 'connected', got '{}'",
            other.kind()
        ))),
    }
}

/// Run the listening side of the handshake.
///
/// # Errors
///
/// Returns `AppError::Transport` on timeout or EOF. Returns
/// `AppError::Protocol` if the first message is not `connect` and
/// `AppError::Unauthorized` if it carries the wrong token; an `error`
/// envelope is sent to the peer first in both cases.
pub async fn server_handshake<R, W>(
    reader: &mut FramedRead<R, EnvelopeCodec>,
    writer: &mut FramedWrite<W, EnvelopeCodec>,
    hello: &ServerHello,
    timeout: Duration,
) -> Result<Negotiated>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let first = match first_envelope(reader, timeout).await {
        Ok(envelope) => envelope,
        Err(err @ (AppError::Protocol(_) | AppError::UnknownMessage(_))) => {
            let _ = writer.send(Envelope::from_error(&err).to_line()?).await;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let (client_version, process_id, workspace_roots, presented) = match first {
        Envelope::Connect {
            client_version,
            process_id,
            workspace_roots,
            auth_token,
        } => (client_version, process_id, workspace_roots, auth_token),
        other => {
            let err = AppError::Protocol(format!(
                "expected 'connect' as first message, got '{}'",
                other.kind()
            ));
            let _ = writer.send(Envelope::from_error(&err).to_line()?).await;
            return Err(err);
        }
    };

    if let Some(ref expected) = hello.auth_token {
        if presented.as_deref() != Some(expected.as_str()) {
            let err = AppError::Unauthorized("connect carried no valid auth token".into());
            warn!(?process_id, "handshake: connect rejected, invalid auth token");
            let _ = writer.send(Envelope::from_error(&err).to_line()?).await;
            return Err(err);
        }
    }

    let connected = Envelope::Connected {
        server_version: PROTOCOL_VERSION.to_owned(),
        capabilities: hello.capabilities.clone(),
        peer_name: Some(hello.peer_name.clone()),
        instance_id: Some(hello.instance_id.clone()),
    };
    writer
        .send(connected.to_line()?)
        .await
        .map_err(|err| AppError::Transport(format!("failed to send connected: {err}")))?;

    debug!(%client_version, ?process_id, "handshake: connect accepted");
    Ok(Negotiated {
        peer: PeerIdentity::Terminal {
            process_id,
            workspace_roots,
            client_version,
        },
        capabilities: hello.capabilities.clone(),
    })
}

async fn first_envelope<R>(
    reader: &mut FramedRead<R, EnvelopeCodec>,
    timeout: Duration,
) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let next = tokio::time::timeout_at(deadline, reader.next())
            .await
            .map_err(|_| {
                AppError::Transport(format!("handshake timeout: no reply within {timeout:?}"))
            })?;
        match next {
            None => return Err(AppError::Transport("peer closed during handshake".into())),
            Some(Err(err)) => {
                return Err(AppError::Transport(format!("handshake io error: {err}")))
            }
            Some(Ok(Frame::Rejected(err))) => return Err(err),
            Some(Ok(Frame::Line(line))) => {
                if let Some(envelope) = parse_inbound_line(&line)? {
                    return Ok(envelope);
                }
            }
        }
    }
}
