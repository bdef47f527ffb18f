//! Established sessions: one reader task and one writer task per connection.
//!
//! Outbound envelopes go through a bounded channel. [`SessionHandle::send`]
//! waits for buffer space (backpressure) but never longer than the
//! configured send timeout; past that it fails with `AppError::Transport`
//! and the envelope is not queued. Per-direction order is FIFO. Closing a
//! session stops new sends; envelopes already queued are still written,
//! bounded by the same timeout.
//!
//! Inbound lines are parsed and forwarded as [`SessionEvent`]s. A malformed
//! or unknown envelope is answered with an `error` envelope and reported as
//! [`SessionEvent::Violation`]; the session stays open. Every session starts
//! with one [`SessionEvent::Connected`] and, when the stream ends for any
//! reason, finishes with exactly one [`SessionEvent::Disconnected`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::{PeerIdentity, SessionId};
use crate::transport::codec::{EnvelopeCodec, Frame};
use crate::transport::envelope::{parse_inbound_line, Envelope};
use crate::transport::handshake::Negotiated;
use crate::{AppError, Result};

/// Tuning shared by every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Outbound queue capacity in envelopes.
    pub send_buffer: usize,
    /// Longest a `send` waits for queue space.
    pub send_timeout: Duration,
    /// Longest either side waits for the handshake.
    pub handshake_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            send_buffer: 256,
            send_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Something that happened on a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session is established. Always the first event of a session.
    Connected(SessionHandle),
    /// A well-formed envelope arrived.
    Message {
        /// Originating session.
        session: SessionId,
        /// The envelope.
        envelope: Envelope,
    },
    /// A malformed or unknown envelope arrived and was answered with `error`.
    Violation {
        /// Originating session.
        session: SessionId,
        /// What was wrong with it.
        error: AppError,
    },
    /// The session ended; no further events follow for it.
    Disconnected {
        /// The session that ended.
        session: SessionId,
        /// Why it ended.
        reason: String,
    },
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: PeerIdentity,
    capabilities: Vec<String>,
    outbound: mpsc::Sender<Envelope>,
    send_timeout: Duration,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Identity of the remote peer.
    #[must_use]
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Capabilities negotiated during the handshake.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Whether the peer handles envelopes of `kind`.
    #[must_use]
    pub fn supports(&self, kind: &str) -> bool {
        self.capabilities.iter().any(|c| c == kind)
    }

    /// Queue `envelope` for delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the session is closed or the queue
    /// stayed full for the whole send timeout.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Transport(format!("session {} is closed", self.id)));
        }
        match tokio::time::timeout(self.send_timeout, self.outbound.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(AppError::Transport(format!("session {} is closed", self.id))),
            Err(_) => Err(AppError::Transport(format!(
                "session {} send buffer full for {:?}",
                self.id, self.send_timeout
            ))),
        }
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session has ended.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

/// Start the reader and writer tasks for a handshaken connection.
pub fn spawn_session<R, W>(
    reader: FramedRead<R, EnvelopeCodec>,
    writer: FramedWrite<W, EnvelopeCodec>,
    negotiated: Negotiated,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
) -> SessionHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = SessionId::generate();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.send_buffer.max(1));
    let cancel = CancellationToken::new();

    info!(session_id = %id, peer = ?negotiated.peer, "session established");
    let handle = SessionHandle {
        id: id.clone(),
        peer: negotiated.peer,
        capabilities: negotiated.capabilities,
        outbound: outbound_tx,
        send_timeout: settings.send_timeout,
        cancel: cancel.clone(),
    };

    let span = info_span!("session", session_id = %id);
    tokio::spawn(
        run_writer(writer, outbound_rx, cancel, settings.send_timeout).instrument(span.clone()),
    );
    tokio::spawn(run_reader(handle.clone(), reader, events).instrument(span));
    handle
}

async fn run_writer<W>(
    mut writer: FramedWrite<W, EnvelopeCodec>,
    mut outbound: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
    drain_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("session writer: cancellation received, draining queue");
                drain_queued(&mut writer, &mut outbound, drain_timeout).await;
                break;
            }

            next = outbound.recv() => {
                let Some(envelope) = next else {
                    debug!("session writer: outbound channel closed, stopping");
                    break;
                };
                let line = match envelope.to_line() {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(%err, "session writer: dropping unserializable envelope");
                        continue;
                    }
                };
                if let Err(err) = writer.send(line).await {
                    warn!(%err, "session writer: write failed, closing session");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

/// Write whatever was queued before the session closed, then shut the
/// write half down.
async fn drain_queued<W>(
    writer: &mut FramedWrite<W, EnvelopeCodec>,
    outbound: &mut mpsc::Receiver<Envelope>,
    limit: Duration,
) where
    W: AsyncWrite + Unpin,
{
    outbound.close();
    let drained = tokio::time::timeout(limit, async {
        let mut written = 0_usize;
        while let Ok(envelope) = outbound.try_recv() {
            let Ok(line) = envelope.to_line() else {
                continue;
            };
            if writer.feed(line).await.is_err() {
                return written;
            }
            written += 1;
        }
        if let Err(err) = writer.close().await {
            debug!(%err, "session writer: shutdown after drain failed");
        }
        written
    })
    .await;

    match drained {
        Ok(written) => debug!(written, "session writer: queue drained"),
        Err(_) => warn!(?limit, "session writer: drain timed out, queued envelopes lost"),
    }
}

async fn run_reader<R>(
    handle: SessionHandle,
    mut reader: FramedRead<R, EnvelopeCodec>,
    events: mpsc::Sender<SessionEvent>,
) where
    R: AsyncRead + Unpin,
{
    let id = handle.id.clone();
    let outbound = handle.outbound.clone();
    let cancel = handle.cancel.clone();
    if events.send(SessionEvent::Connected(handle)).await.is_err() {
        cancel.cancel();
        return;
    }

    let reason = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break "closed locally".to_owned(),
            next = reader.next() => next,
        };

        let parsed = match next {
            None => break "peer closed the connection".to_owned(),
            Some(Err(err)) => break format!("read failed: {err}"),
            Some(Ok(Frame::Rejected(err))) => Err(err),
            Some(Ok(Frame::Line(line))) => parse_inbound_line(&line),
        };

        let event = match parsed {
            Ok(None) => continue,
            Ok(Some(envelope)) => SessionEvent::Message {
                session: id.clone(),
                envelope,
            },
            Err(error) => {
                warn!(%error, "protocol violation from peer");
                // Never wait on our own queue here; a full queue drops the reply.
                if outbound.try_send(Envelope::from_error(&error)).is_err() {
                    debug!("error reply dropped: outbound queue full or closed");
                }
                SessionEvent::Violation {
                    session: id.clone(),
                    error,
                }
            }
        };

        if events.send(event).await.is_err() {
            break "event consumer gone".to_owned();
        }
    };

    cancel.cancel();
    info!(%reason, "session ended");
    let _ = events
        .send(SessionEvent::Disconnected {
            session: id,
            reason,
        })
        .await;
}
