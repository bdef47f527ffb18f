//! Duplex envelope transport between the agent driver and the editor host.
//!
//! Connections run over a local socket (named pipe on Windows, Unix domain
//! socket elsewhere) through the `interprocess` crate. Each connection is
//! framed with [`codec::EnvelopeCodec`], handshaken, and then driven by a
//! reader and a writer task (see [`session`]).

pub mod codec;
pub mod envelope;
pub mod handshake;
pub mod session;

use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::transport::codec::EnvelopeCodec;
use crate::transport::handshake::{client_handshake, server_handshake, ClientHello, ServerHello};
use crate::transport::session::{spawn_session, SessionEvent, SessionHandle, SessionSettings};
use crate::{AppError, Result};

pub use envelope::{Envelope, StatusLevel};

/// Connect to `endpoint` and complete the handshake.
///
/// Session events are delivered on `events`.
///
/// # Errors
///
/// Returns `AppError::Transport` if the endpoint is unreachable or the
/// handshake fails. Callers treat this as a downgrade to standalone mode.
pub async fn connect(
    endpoint: &str,
    hello: &ClientHello,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
) -> Result<SessionHandle> {
    let name = endpoint
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Transport(format!("invalid endpoint '{endpoint}': {err}")))?;
    let stream = tokio::time::timeout(settings.handshake_timeout, Stream::connect(name))
        .await
        .map_err(|_| AppError::Transport(format!("connect to '{endpoint}' timed out")))?
        .map_err(|err| AppError::Transport(format!("connect to '{endpoint}' failed: {err}")))?;

    let (recv, send) = stream.split();
    let mut reader = FramedRead::new(recv, EnvelopeCodec::new());
    let mut writer = FramedWrite::new(send, EnvelopeCodec::new());
    let negotiated =
        client_handshake(&mut reader, &mut writer, hello, settings.handshake_timeout).await?;

    info!(endpoint, "connected to editor host");
    Ok(spawn_session(reader, writer, negotiated, settings, events))
}

/// Listening side of the transport.
pub struct SessionListener {
    listener: Listener,
    endpoint: String,
    hello: ServerHello,
    settings: SessionSettings,
}

impl SessionListener {
    /// Bind `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the name is invalid or already taken.
    pub fn bind(endpoint: &str, hello: ServerHello, settings: SessionSettings) -> Result<Self> {
        let name = endpoint
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Transport(format!("invalid endpoint '{endpoint}': {err}")))?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|err| {
                AppError::Transport(format!("failed to listen on '{endpoint}': {err}"))
            })?;
        info!(endpoint, "session listener bound");
        Ok(Self {
            listener,
            endpoint: endpoint.to_owned(),
            hello,
            settings,
        })
    }

    /// Name the listener is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Accept connections until `cancel` fires.
    ///
    /// Each established session announces itself with
    /// [`SessionEvent::Connected`] on `events`. Each handshake runs in its
    /// own task so a stalled connector does not hold up others. Failed
    /// handshakes are logged and dropped.
    pub fn incoming(
        self,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let span = info_span!("session_listener", endpoint = %self.endpoint);
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("session listener shutting down");
                            break;
                        }
                        accepted = self.listener.accept() => {
                            match accepted {
                                Ok(stream) => {
                                    let hello = self.hello.clone();
                                    let settings = self.settings;
                                    let events = events.clone();
                                    tokio::spawn(async move {
                                        if let Err(err) =
                                            accept_stream(stream, &hello, settings, events).await
                                        {
                                            warn!(%err, "handshake failed");
                                        }
                                    });
                                }
                                Err(err) => warn!(%err, "accept failed"),
                            }
                        }
                    }
                }
            }
            .instrument(span),
        )
    }
}

async fn accept_stream(
    stream: Stream,
    hello: &ServerHello,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
) -> Result<SessionHandle> {
    let (recv, send) = stream.split();
    let mut reader = FramedRead::new(recv, EnvelopeCodec::new());
    let mut writer = FramedWrite::new(send, EnvelopeCodec::new());
    let negotiated =
        server_handshake(&mut reader, &mut writer, hello, settings.handshake_timeout).await?;
    debug!(peer = ?negotiated.peer, "handshake completed");
    Ok(spawn_session(reader, writer, negotiated, settings, events))
}
