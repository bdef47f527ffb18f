//! Agent bridge: the terminal-driver side of the link.
//!
//! [`AgentBridge::connect`] discovers a running editor host and connects to
//! it. When there is none, or it cannot be reached, the bridge runs
//! standalone and applies edits directly to files. Proposals never block:
//! decisions arrive later as [`BridgeEvent`]s on [`AgentBridge::subscribe`].
//! If the host goes away, the bridge switches itself to standalone.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::diff::line_diff::edits_from_texts;
use crate::diff::writer::WriteSummary;
use crate::diff::{validate_workspace_path, ApplyReport, EditApplier};
use crate::models::Edit;
use crate::registry::{DiscoverySource, Registry};
use crate::surface::FileSurface;
use crate::transport::envelope::{
    CAP_APPLY_DIFF, CAP_CLOSE_DIFF, CAP_OPEN_DIFF, CAP_PROPOSE_DIFF, CAP_STATUS,
};
use crate::transport::handshake::ClientHello;
use crate::transport::session::{SessionEvent, SessionHandle, SessionSettings};
use crate::transport::{self, Envelope, StatusLevel};
use crate::{AppError, Result};

/// Capacity of the decision broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Whether a host is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Connected to an editor host; edits go through review.
    Connected,
    /// No host; edits are applied directly.
    Standalone,
}

/// Something the host told the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A proposal was resolved with at least one accepted edit.
    Accepted {
        /// Target file.
        file: PathBuf,
        /// Accepted edit indices.
        accepted: Vec<usize>,
        /// Rejected edit indices.
        rejected: Vec<usize>,
    },
    /// A proposal was rejected entirely.
    Rejected {
        /// Target file.
        file: PathBuf,
    },
    /// The host reported a failure.
    Error {
        /// Description.
        message: String,
        /// Stable code.
        code: String,
        /// File the failed request addressed, if the host named one.
        file: Option<PathBuf>,
    },
    /// Advisory message from the host.
    Status {
        /// Text.
        message: String,
        /// Severity.
        level: StatusLevel,
    },
    /// The host went away; the bridge is now standalone.
    Disconnected {
        /// Why the session ended.
        reason: String,
    },
}

impl BridgeEvent {
    fn from_envelope(envelope: Envelope) -> Option<Self> {
        match envelope {
            Envelope::DiffAccepted {
                file,
                accepted,
                rejected,
            } => Some(Self::Accepted {
                file,
                accepted,
                rejected,
            }),
            Envelope::DiffRejected { file } => Some(Self::Rejected { file }),
            Envelope::Error {
                message,
                code,
                file,
            } => Some(Self::Error {
                message,
                code,
                file,
            }),
            Envelope::Status { message, level } => Some(Self::Status { message, level }),
            other => {
                debug!(kind = other.kind(), "ignoring envelope from host");
                None
            }
        }
    }
}

/// Result of [`AgentBridge::propose_edit`] and the tool layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeOutcome {
    /// Sent to the host for review; the decision arrives as an event.
    Proposed,
    /// Applied directly in standalone mode.
    Applied(ApplyReport),
    /// A new file was written directly.
    Created(PathBuf),
    /// Nothing to change.
    Unchanged,
}

impl From<WriteSummary> for ProposeOutcome {
    fn from(summary: WriteSummary) -> Self {
        Self::Created(summary.path)
    }
}

/// Handle the agent's tool layer uses to propose edits.
pub struct AgentBridge {
    session: Arc<Mutex<Option<SessionHandle>>>,
    local: Mutex<EditApplier<FileSurface>>,
    roots: Vec<PathBuf>,
    decision_timeout: Duration,
    events: broadcast::Sender<BridgeEvent>,
}

impl AgentBridge {
    /// Discover a host and connect, falling back to standalone.
    ///
    /// A rendezvous record naming an unreachable endpoint is retracted so
    /// later drivers do not trip over it. An endpoint inherited through the
    /// environment is left alone.
    pub async fn connect(config: &GlobalConfig) -> Self {
        let registry = match config.registry() {
            Ok(registry) => Some(registry),
            Err(err) => {
                debug!(%err, "no rendezvous registry available");
                None
            }
        };
        let Some(found) = registry.as_ref().and_then(Registry::discover) else {
            info!("no editor host discovered; running standalone");
            return Self::standalone(config);
        };

        match Self::connect_to(config, &found.endpoint, found.auth_token.as_deref()).await {
            Ok(bridge) => bridge,
            Err(err) => {
                warn!(endpoint = %found.endpoint, %err, "editor host unreachable; running standalone");
                // A host that refused our token is alive; its record stays.
                let unreachable = !matches!(err, AppError::Unauthorized(_));
                if let (true, DiscoverySource::RecordFile, Some(registry), Some(record)) = (
                    unreachable,
                    found.source,
                    registry.as_ref(),
                    found.record.as_ref(),
                ) {
                    if let Err(err) = registry.retract_if_owned(record.process_id, &record.endpoint)
                    {
                        warn!(%err, "failed to retract stale rendezvous record");
                    }
                }
                Self::standalone(config)
            }
        }
    }

    /// Connect to an explicit `endpoint`, presenting `auth_token`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the host is unreachable or the
    /// handshake fails, and `AppError::Unauthorized` if the host refuses
    /// the token.
    pub async fn connect_to(
        config: &GlobalConfig,
        endpoint: &str,
        auth_token: Option<&str>,
    ) -> Result<Self> {
        let hello = ClientHello {
            process_id: Some(std::process::id()),
            workspace_roots: config.workspace_roots.clone(),
            auth_token: auth_token.map(str::to_owned),
        };
        let settings: SessionSettings = config.session_settings();
        let (events_tx, events_rx) = mpsc::channel(settings.send_buffer);
        let handle = transport::connect(endpoint, &hello, settings, events_tx).await?;

        let bridge = Self::build(config, Some(handle));
        let span = info_span!("bridge_events", endpoint);
        tokio::spawn(
            pump(events_rx, Arc::clone(&bridge.session), bridge.events.clone()).instrument(span),
        );
        Ok(bridge)
    }

    /// A bridge with no host.
    #[must_use]
    pub fn standalone(config: &GlobalConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: &GlobalConfig, session: Option<SessionHandle>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: Arc::new(Mutex::new(session)),
            local: Mutex::new(EditApplier::new(FileSurface::new())),
            roots: config.workspace_roots.clone(),
            decision_timeout: config.decision_timeout(),
            events,
        }
    }

    /// Current mode.
    pub async fn mode(&self) -> BridgeMode {
        match self.live_session().await {
            Some(_) => BridgeMode::Connected,
            None => BridgeMode::Standalone,
        }
    }

    /// Receive host decisions and notices from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Validate `path` against the workspace roots.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` for paths outside the workspace.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        validate_workspace_path(&self.roots, path)
    }

    /// Offer `edits` to the host for review, or apply them when standalone.
    ///
    /// Never waits for a decision.
    ///
    /// # Errors
    ///
    /// - `AppError::PathViolation` for a path outside the workspace.
    /// - Apply errors from the standalone path.
    pub async fn propose_edit(
        &self,
        file: impl AsRef<Path>,
        edits: Vec<Edit>,
        description: &str,
    ) -> Result<ProposeOutcome> {
        let file = self.resolve(file)?;
        if let Some(session) = self.session_supporting(CAP_PROPOSE_DIFF).await {
            let envelope = Envelope::ProposeDiff {
                file: file.clone(),
                edits: edits.clone(),
                description: description.to_owned(),
            };
            match session.send(envelope).await {
                Ok(()) => {
                    debug!(path = %file.display(), edits = edits.len(), "proposal sent");
                    return Ok(ProposeOutcome::Proposed);
                }
                Err(err) => self.downgrade(&err.to_string()).await,
            }
        }
        self.apply_locally(&file, &edits).await.map(ProposeOutcome::Applied)
    }

    /// Show a whole-document change and wait for the decision.
    ///
    /// Returns `true` if at least part of the change was accepted. Gives up
    /// with `false` after the decision timeout, on a host error, or if the
    /// host disconnects. Standalone, the change is applied and `true`
    /// returned.
    ///
    /// # Errors
    ///
    /// Path and standalone apply errors.
    pub async fn open_diff(
        &self,
        file: impl AsRef<Path>,
        before: &str,
        after: &str,
        description: &str,
    ) -> Result<bool> {
        let file = self.resolve(file)?;
        if before == after {
            return Ok(true);
        }

        if let Some(session) = self.session_supporting(CAP_OPEN_DIFF).await {
            let mut decisions = self.subscribe();
            let envelope = Envelope::OpenDiff {
                file: file.clone(),
                before: before.to_owned(),
                after: after.to_owned(),
                description: description.to_owned(),
            };
            match session.send(envelope).await {
                Ok(()) => return Ok(self.await_decision(&file, &mut decisions).await),
                Err(err) => self.downgrade(&err.to_string()).await,
            }
        }

        let edits = edits_from_texts(before, after)?;
        self.apply_locally(&file, &edits).await?;
        Ok(true)
    }

    /// Apply `edits` without review (legacy path).
    ///
    /// # Errors
    ///
    /// Path and standalone apply errors.
    pub async fn apply_diff(&self, file: impl AsRef<Path>, edits: Vec<Edit>) -> Result<()> {
        let file = self.resolve(file)?;
        if let Some(session) = self.session_supporting(CAP_APPLY_DIFF).await {
            let envelope = Envelope::ApplyDiff {
                file: file.clone(),
                edits: edits.clone(),
            };
            match session.send(envelope).await {
                Ok(()) => return Ok(()),
                Err(err) => self.downgrade(&err.to_string()).await,
            }
        }
        self.apply_locally(&file, &edits).await.map(|_| ())
    }

    /// Ask the host to drop any pending proposal for `file`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` for a path outside the workspace.
    pub async fn close_diff(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = self.resolve(file)?;
        if let Some(session) = self.session_supporting(CAP_CLOSE_DIFF).await {
            if let Err(err) = session.send(Envelope::CloseDiff { file }).await {
                self.downgrade(&err.to_string()).await;
            }
        }
        Ok(())
    }

    /// Advisory progress message. Logged locally when standalone.
    pub async fn send_status(&self, message: &str, level: StatusLevel) {
        let envelope = Envelope::Status {
            message: message.to_owned(),
            level,
        };
        if !self.send_advisory(Some(CAP_STATUS), envelope).await {
            info!(?level, message, "status");
        }
    }

    /// Agent text response for display.
    pub async fn send_response(&self, content: &str) {
        let envelope = Envelope::Response {
            content: content.to_owned(),
        };
        if !self.send_advisory(None, envelope).await {
            debug!(bytes = content.len(), "response not forwarded; standalone");
        }
    }

    /// Notice that the agent ran a tool.
    pub async fn send_tool_executed(&self, tool: &str, arguments: Value, result: &str) {
        let envelope = Envelope::ToolExecuted {
            tool: tool.to_owned(),
            arguments,
            result: result.to_owned(),
        };
        if !self.send_advisory(None, envelope).await {
            debug!(tool, "tool notice not forwarded; standalone");
        }
    }

    /// Close the session, if any. The bridge is standalone afterwards.
    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close();
            info!(session_id = %session.id(), "bridge closed");
        }
    }

    async fn await_decision(
        &self,
        file: &Path,
        decisions: &mut broadcast::Receiver<BridgeEvent>,
    ) -> bool {
        let wait = async {
            loop {
                match decisions.recv().await {
                    Ok(BridgeEvent::Accepted { file: f, .. }) if f == file => return true,
                    Ok(BridgeEvent::Rejected { file: f }) if f == file => return false,
                    Ok(BridgeEvent::Error {
                        message,
                        code,
                        file: Some(f),
                    }) if f == file => {
                        warn!(%code, %message, "host refused the proposal being awaited");
                        return false;
                    }
                    Ok(BridgeEvent::Error { message, code, .. }) => {
                        debug!(%code, %message, "host error for another request");
                    }
                    Ok(BridgeEvent::Disconnected { .. }) | Err(broadcast::error::RecvError::Closed) => {
                        return false;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "decision listener lagged");
                    }
                }
            }
        };
        match tokio::time::timeout(self.decision_timeout, wait).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(path = %file.display(), timeout = ?self.decision_timeout, "no decision before timeout");
                false
            }
        }
    }

    async fn apply_locally(&self, file: &Path, edits: &[Edit]) -> Result<ApplyReport> {
        let mut applier = self.local.lock().await;
        let snapshot = applier.snapshot(file)?;
        applier.apply(file, edits, &snapshot)
    }

    async fn send_advisory(&self, capability: Option<&str>, envelope: Envelope) -> bool {
        let Some(session) = self.live_session().await else {
            return false;
        };
        if capability.is_some_and(|kind| !session.supports(kind)) {
            return false;
        }
        match session.send(envelope).await {
            Ok(()) => true,
            Err(err) => {
                self.downgrade(&err.to_string()).await;
                false
            }
        }
    }

    async fn session_supporting(&self, capability: &str) -> Option<SessionHandle> {
        self.live_session()
            .await
            .filter(|session| session.supports(capability))
    }

    async fn live_session(&self) -> Option<SessionHandle> {
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(SessionHandle::is_closed) {
            *guard = None;
        }
        guard.clone()
    }

    async fn downgrade(&self, reason: &str) {
        if let Some(session) = self.session.lock().await.take() {
            session.close();
            warn!(%reason, "lost editor host; switching to standalone");
        }
    }
}

async fn pump(
    mut events: mpsc::Receiver<SessionEvent>,
    session: Arc<Mutex<Option<SessionHandle>>>,
    decisions: broadcast::Sender<BridgeEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected(_) => {}
            SessionEvent::Message { envelope, .. } => {
                if let Some(event) = BridgeEvent::from_envelope(envelope) {
                    // No subscribers is fine; decisions are advisory to the agent.
                    let _ = decisions.send(event);
                }
            }
            SessionEvent::Violation { error, .. } => {
                warn!(%error, "malformed envelope from host");
            }
            SessionEvent::Disconnected { reason, .. } => {
                session.lock().await.take();
                warn!(%reason, "editor host disconnected; switching to standalone");
                let _ = decisions.send(BridgeEvent::Disconnected { reason });
                break;
            }
        }
    }
}
