//! Action dispatcher: the only writer of the diff state store.
//!
//! Inbound envelopes (via [`Dispatcher::handle_envelope`]) and user actions
//! (via [`Dispatcher::dispatch`]) are both expressed as an [`Action`] and run
//! through one transition function while holding the dispatcher lock, so a
//! superseding proposal and an in-flight decision for the same file can
//! never interleave.
//!
//! Per-file lifecycle: `None -> Proposed -> (Partial ->)* Accepted | Rejected -> None`.
//! Every transition is idempotent on an already-resolved edit or an absent
//! proposal. Effects on peers are returned as [`Notification`]s addressed to
//! the session that originated the proposal; delivering them is the
//! caller's job.

mod machine;
mod table;

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info_span};

use crate::config::PreviewMode;
use crate::diff::{validate_workspace_path, EditApplier};
use crate::models::{Edit, FileState, Proposal, SessionId};
use crate::store::DiffStore;
use crate::surface::presentation::project;
use crate::surface::{Annotation, EditingSurface};
use crate::transport::Envelope;
use crate::AppError;

use machine::Machine;

/// A request to change proposal state.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Replace the proposal for `file` with `edits`.
    ProposeDiff {
        /// Session that sent it; `None` for local callers.
        origin: Option<SessionId>,
        /// Target file.
        file: PathBuf,
        /// Edits against the file's persisted content.
        edits: Vec<Edit>,
        /// Summary for the reviewer.
        description: String,
    },
    /// Propose the line diff between two full texts.
    OpenDiff {
        /// Session that sent it.
        origin: Option<SessionId>,
        /// Target file.
        file: PathBuf,
        /// Text the diff starts from.
        before: String,
        /// Text the diff ends at.
        after: String,
        /// Summary for the reviewer.
        description: String,
    },
    /// Apply edits immediately without tracking a proposal.
    ApplyDiff {
        /// Session that sent it.
        origin: Option<SessionId>,
        /// Target file.
        file: PathBuf,
        /// Edits against the file's persisted content.
        edits: Vec<Edit>,
    },
    /// Accept every pending edit of the proposal for `file`.
    AcceptAll {
        /// Target file.
        file: PathBuf,
    },
    /// Reject every pending edit of the proposal for `file`.
    RejectAll {
        /// Target file.
        file: PathBuf,
    },
    /// Accept a single edit.
    AcceptEdit {
        /// Target file.
        file: PathBuf,
        /// Edit index within the proposal.
        index: usize,
    },
    /// Reject a single edit.
    RejectEdit {
        /// Target file.
        file: PathBuf,
        /// Edit index within the proposal.
        index: usize,
    },
    /// Drop the proposal for `file` without notifying anyone.
    CloseDiff {
        /// Target file.
        file: PathBuf,
    },
    /// A session ended; its proposals fall back to local-only handling.
    SessionClosed {
        /// The session that ended.
        session: SessionId,
    },
}

impl Action {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProposeDiff { .. } => "propose_diff",
            Self::OpenDiff { .. } => "open_diff",
            Self::ApplyDiff { .. } => "apply_diff",
            Self::AcceptAll { .. } => "accept_all",
            Self::RejectAll { .. } => "reject_all",
            Self::AcceptEdit { .. } => "accept_edit",
            Self::RejectEdit { .. } => "reject_edit",
            Self::CloseDiff { .. } => "close_diff",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}

/// An envelope to deliver to one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Recipient.
    pub target: SessionId,
    /// What to send.
    pub envelope: Envelope,
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Normalized file the action addressed, when it addressed one.
    pub file: Option<PathBuf>,
    /// File state after the transition; terminal states are reported even
    /// though the proposal has already left the store.
    pub state: FileState,
    /// Envelopes for peers.
    pub notifications: Vec<Notification>,
    /// Why the action failed, if it did. State is unchanged on failure.
    pub error: Option<AppError>,
}

impl Outcome {
    pub(crate) fn done(file: PathBuf, state: FileState, notifications: Vec<Notification>) -> Self {
        Self {
            file: Some(file),
            state,
            notifications,
            error: None,
        }
    }

    pub(crate) fn idle() -> Self {
        Self {
            file: None,
            state: FileState::None,
            notifications: Vec::new(),
            error: None,
        }
    }

    /// A failure reported back to `reply_to` as an `error` envelope.
    pub(crate) fn failed(
        file: Option<PathBuf>,
        state: FileState,
        error: AppError,
        reply_to: Option<&SessionId>,
    ) -> Self {
        let named = file.clone();
        Self::reply_error(file, state, error, named, reply_to)
    }

    /// A request whose path did not resolve. The reply names the path as
    /// the requester sent it.
    pub(crate) fn refused(requested: &Path, error: AppError, reply_to: Option<&SessionId>) -> Self {
        Self::reply_error(
            None,
            FileState::None,
            error,
            Some(requested.to_path_buf()),
            reply_to,
        )
    }

    fn reply_error(
        file: Option<PathBuf>,
        state: FileState,
        error: AppError,
        named: Option<PathBuf>,
        reply_to: Option<&SessionId>,
    ) -> Self {
        let notifications = reply_to
            .map(|target| Notification {
                target: target.clone(),
                envelope: Envelope::error_for(&error, named),
            })
            .into_iter()
            .collect();
        Self {
            file,
            state,
            notifications,
            error: Some(error),
        }
    }

    /// Whether the action succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The error, if any, as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the stored error when the action failed.
    pub fn into_result(self) -> crate::Result<Self> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Proposal plus its current presentation, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalView {
    /// The proposal as stored.
    pub proposal: Proposal,
    /// Annotations the surface shows for it.
    pub annotations: Vec<Annotation>,
}

/// Serializes every store mutation and the edit applier behind one lock.
#[derive(Debug)]
pub struct Dispatcher<S> {
    machine: Mutex<Machine<S>>,
    roots: Vec<PathBuf>,
}

impl<S: EditingSurface> Dispatcher<S> {
    /// Dispatcher over `surface`, accepting files inside `roots`.
    #[must_use]
    pub fn new(surface: S, roots: Vec<PathBuf>, preview: PreviewMode) -> Self {
        Self {
            machine: Mutex::new(Machine::new(
                DiffStore::new(),
                EditApplier::new(surface),
                roots.clone(),
                preview,
            )),
            roots,
        }
    }

    /// Workspace roots files must lie in.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Run `action` through the transition function.
    pub async fn dispatch(&self, action: Action) -> Outcome {
        let mut machine = self.machine.lock().await;
        let span = info_span!("dispatch", action = action.name());
        let _guard = span.enter();
        let outcome = machine.transition(action);
        debug!(
            state = ?outcome.state,
            notifications = outcome.notifications.len(),
            ok = outcome.is_ok(),
            "transition complete"
        );
        outcome
    }

    /// Route an inbound envelope from `session` through the dispatch table.
    pub async fn handle_envelope(&self, session: &SessionId, envelope: Envelope) -> Outcome {
        match table::route(session, envelope) {
            table::Route::Act(action) => self.dispatch(action).await,
            table::Route::Done(outcome) => outcome,
        }
    }

    /// Copy of the pending proposal for `file`.
    pub async fn get(&self, file: &Path) -> Option<Proposal> {
        let file = self.resolve(file)?;
        self.machine.lock().await.store().get(&file).cloned()
    }

    /// Lifecycle state of `file`.
    pub async fn state(&self, file: &Path) -> FileState {
        match self.resolve(file) {
            Some(file) => self.machine.lock().await.store().state(&file),
            None => FileState::None,
        }
    }

    /// Every pending proposal, in path order.
    pub async fn list(&self) -> Vec<Proposal> {
        self.machine.lock().await.store().iter().cloned().collect()
    }

    /// Proposal for `file` with its annotations recomputed.
    pub async fn show(&self, file: &Path) -> Option<ProposalView> {
        let proposal = self.get(file).await?;
        let annotations = project(&proposal).unwrap_or_default();
        Some(ProposalView {
            proposal,
            annotations,
        })
    }

    /// Run `f` against the editing surface under the dispatcher lock.
    pub async fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let machine = self.machine.lock().await;
        f(machine.surface())
    }

    fn resolve(&self, file: &Path) -> Option<PathBuf> {
        validate_workspace_path(&self.roots, file).ok()
    }
}
