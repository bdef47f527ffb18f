//! Editor host: the listening side of the bridge.
//!
//! Binds the session listener, publishes the rendezvous record and keeps it
//! fresh, and routes every session event through the dispatcher. Each run
//! mints a random auth token; connectors must present it in their
//! handshake. Outbound
//! notifications go to the session that originated the proposal. On
//! cancellation all sessions are closed and the record is retracted.

pub mod sessions;
pub mod spawner;

use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::dispatcher::{Action, Dispatcher};
use crate::registry::{spawn_refresh_task, Registry, RendezvousRecord};
use crate::surface::EditingSurface;
use crate::transport::envelope::host_capabilities;
use crate::transport::handshake::ServerHello;
use crate::transport::session::SessionEvent;
use crate::transport::SessionListener;
use crate::Result;

pub use sessions::SessionDirectory;
pub use spawner::spawn_terminal;

/// Capacity of the session event channel.
const EVENT_BUFFER: usize = 256;

/// A bound, published editor host ready to [`run`](Self::run).
pub struct EditorHost<S> {
    config: Arc<GlobalConfig>,
    dispatcher: Arc<Dispatcher<S>>,
    sessions: Arc<SessionDirectory>,
    listener: SessionListener,
    registry: Option<(Registry, RendezvousRecord)>,
    auth_token: String,
    cancel: CancellationToken,
}

impl<S: EditingSurface + 'static> EditorHost<S> {
    /// Bind the configured endpoint and publish the rendezvous record.
    ///
    /// A record that cannot be written is logged; drivers started through
    /// [`Self::spawn_terminal`] still find the host via the environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the endpoint cannot be bound.
    pub fn bind(config: Arc<GlobalConfig>, surface: S) -> Result<Self> {
        let auth_token = Uuid::new_v4().to_string();
        let hello = ServerHello {
            peer_name: config.peer_name.clone(),
            instance_id: Uuid::new_v4().to_string(),
            capabilities: host_capabilities(),
            auth_token: Some(auth_token.clone()),
        };
        let listener = SessionListener::bind(&config.endpoint, hello, config.session_settings())?;

        let registry = match config.registry().and_then(|registry| {
            let record = registry.publish(
                &config.endpoint,
                &config.peer_name,
                &config.workspace_roots,
                Some(&auth_token),
            )?;
            Ok((registry, record))
        }) {
            Ok(published) => Some(published),
            Err(err) => {
                warn!(
                    %err,
                    "rendezvous record not published; discovery limited to the environment"
                );
                None
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(
            surface,
            config.workspace_roots.clone(),
            config.preview,
        ));

        Ok(Self {
            config,
            dispatcher,
            sessions: Arc::new(SessionDirectory::new()),
            listener,
            registry,
            auth_token,
            cancel: CancellationToken::new(),
        })
    }

    /// Secret this run expects from connectors and control clients.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Shared dispatcher, for user-action front ends.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher<S>> {
        Arc::clone(&self.dispatcher)
    }

    /// Shared session directory, for notification delivery.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionDirectory> {
        Arc::clone(&self.sessions)
    }

    /// Endpoint the host listens on.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.listener.endpoint()
    }

    /// Token that stops [`Self::run`] when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Launch a terminal program that inherits this host's endpoint and
    /// auth token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the process fails to spawn.
    pub fn spawn_terminal(&self, program: &str, args: &[String]) -> Result<Child> {
        let cwd = self
            .config
            .workspace_roots
            .first()
            .cloned()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        spawn_terminal(program, args, &cwd, self.endpoint(), &self.auth_token)
    }

    /// Serve sessions until the cancel token fires, then shut down cleanly.
    pub async fn run(self) {
        let Self {
            config,
            dispatcher,
            sessions,
            listener,
            registry,
            cancel,
            ..
        } = self;

        let endpoint = listener.endpoint().to_owned();
        let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER);
        let accept_loop = listener.incoming(events_tx, cancel.clone());

        let refresh = registry.as_ref().map(|(registry, record)| {
            spawn_refresh_task(
                registry.clone(),
                record.clone(),
                config.refresh_interval(),
                cancel.clone(),
            )
        });

        info!(%endpoint, "editor host ready");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(event) = events.recv() => {
                    handle_event(&dispatcher, &sessions, event).await;
                }
            }
        }

        info!("editor host shutting down");
        sessions.close_all().await;
        let _ = accept_loop.await;
        if let Some(handle) = refresh {
            let _ = handle.await;
        }
        if let Some((registry, record)) = registry {
            if let Err(err) = registry.retract_if_owned(record.process_id, &record.endpoint) {
                warn!(%err, "failed to retract rendezvous record");
            }
        }
        info!("editor host stopped");
    }
}

async fn handle_event<S: EditingSurface>(
    dispatcher: &Dispatcher<S>,
    sessions: &SessionDirectory,
    event: SessionEvent,
) {
    match event {
        SessionEvent::Connected(session) => {
            info!(session_id = %session.id(), peer = ?session.peer(), "driver connected");
            sessions.insert(session).await;
        }
        SessionEvent::Message { session, envelope } => {
            let outcome = dispatcher.handle_envelope(&session, envelope).await;
            if let Some(ref err) = outcome.error {
                debug!(session_id = %session, %err, "inbound envelope failed");
            }
            sessions.deliver(outcome.notifications).await;
        }
        SessionEvent::Violation { session, error } => {
            debug!(session_id = %session, %error, "protocol violation already answered");
        }
        SessionEvent::Disconnected { session, reason } => {
            sessions.remove(&session).await;
            info!(session_id = %session, %reason, "driver disconnected");
            dispatcher.dispatch(Action::SessionClosed { session }).await;
        }
    }
}
