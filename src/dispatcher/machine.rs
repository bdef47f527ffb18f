//! The transition function.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::PreviewMode;
use crate::diff::line_diff::edits_from_texts;
use crate::diff::splice::{resolve_edits, Rebaser};
use crate::diff::{validate_workspace_path, EditApplier};
use crate::dispatcher::{Action, Notification, Outcome};
use crate::models::{Edit, EditStatus, FileState, Proposal, SessionId};
use crate::store::{DiffStore, Resolution};
use crate::surface::presentation::project;
use crate::surface::EditingSurface;
use crate::transport::{Envelope, StatusLevel};
use crate::{AppError, Result};

/// Pending edits of a proposal re-expressed against the live document.
struct Rebased {
    /// Snapshot plus every accepted edit.
    base: String,
    /// Pending edits in live coordinates.
    edits: Vec<Edit>,
}

impl Rebased {
    fn of(proposal: &Proposal) -> Result<Self> {
        let rebaser = Rebaser::new(&proposal.snapshot, proposal.accepted_edits())?;
        let edits = proposal
            .edits
            .iter()
            .zip(&proposal.statuses)
            .filter(|(_, status)| **status == EditStatus::Pending)
            .map(|(edit, _)| rebaser.rebase(edit))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            base: rebaser.base().to_owned(),
            edits,
        })
    }
}

#[derive(Debug)]
pub(crate) struct Machine<S> {
    store: DiffStore,
    applier: EditApplier<S>,
    roots: Vec<PathBuf>,
    preview: PreviewMode,
}

impl<S: EditingSurface> Machine<S> {
    pub(crate) fn new(
        store: DiffStore,
        applier: EditApplier<S>,
        roots: Vec<PathBuf>,
        preview: PreviewMode,
    ) -> Self {
        Self {
            store,
            applier,
            roots,
            preview,
        }
    }

    pub(crate) fn store(&self) -> &DiffStore {
        &self.store
    }

    pub(crate) fn surface(&self) -> &S {
        self.applier.surface()
    }

    pub(crate) fn transition(&mut self, action: Action) -> Outcome {
        match action {
            Action::ProposeDiff {
                origin,
                file,
                edits,
                description,
            } => self.propose(origin, &file, edits, description, None),
            Action::OpenDiff {
                origin,
                file,
                before,
                after,
                description,
            } => self.open_diff(origin, &file, &before, &after, description),
            Action::ApplyDiff {
                origin,
                file,
                edits,
            } => self.apply_direct(origin, &file, &edits),
            Action::AcceptAll { file } => self.accept_all(&file),
            Action::RejectAll { file } => self.reject_all(&file),
            Action::AcceptEdit { file, index } => {
                self.resolve_one(&file, index, EditStatus::Accepted)
            }
            Action::RejectEdit { file, index } => {
                self.resolve_one(&file, index, EditStatus::Rejected)
            }
            Action::CloseDiff { file } => self.close(&file),
            Action::SessionClosed { session } => self.session_closed(&session),
        }
    }

    fn propose(
        &mut self,
        origin: Option<SessionId>,
        raw: &Path,
        edits: Vec<Edit>,
        description: String,
        snapshot: Option<String>,
    ) -> Outcome {
        let file = match self.resolve_path(raw) {
            Ok(file) => file,
            Err(err) => return Outcome::refused(raw, err, origin.as_ref()),
        };
        let state = self.store.state(&file);

        if edits.is_empty() {
            let err = AppError::Protocol(format!("proposal for {} has no edits", file.display()));
            return Outcome::failed(Some(file), state, err, origin.as_ref());
        }

        let snapshot = match snapshot.map_or_else(|| self.applier.snapshot(&file), Ok) {
            Ok(snapshot) => snapshot,
            Err(err) => return Outcome::failed(Some(file), state, err, origin.as_ref()),
        };
        if let Err(err) = resolve_edits(&snapshot, &edits) {
            return Outcome::failed(Some(file), state, err, origin.as_ref());
        }

        let proposal = Proposal::new(file.clone(), edits, description, snapshot, origin.clone());
        info!(
            path = %file.display(),
            proposal_id = %proposal.id,
            edits = proposal.edits.len(),
            origin = ?origin,
            "proposal received"
        );

        let mut notifications = Vec::new();
        if let Some(old) = self.store.put_proposal(proposal) {
            notifications.extend(superseded(&old));
        }
        if self.preview == PreviewMode::Inline {
            self.preview_pending(&file);
        }
        self.render(&file);
        Outcome::done(file, FileState::Proposed, notifications)
    }

    fn open_diff(
        &mut self,
        origin: Option<SessionId>,
        raw: &Path,
        before: &str,
        after: &str,
        description: String,
    ) -> Outcome {
        let edits = match edits_from_texts(before, after) {
            Ok(edits) => edits,
            Err(err) => return Outcome::refused(raw, err, origin.as_ref()),
        };
        if let Ok(file) = self.resolve_path(raw) {
            match self.applier.snapshot(&file) {
                Ok(current) if current != before => warn!(
                    path = %file.display(),
                    "openDiff base differs from the persisted file; accepting will fail as stale"
                ),
                _ => {}
            }
        }
        self.propose(origin, raw, edits, description, Some(before.to_owned()))
    }

    fn apply_direct(&mut self, origin: Option<SessionId>, raw: &Path, edits: &[Edit]) -> Outcome {
        let file = match self.resolve_path(raw) {
            Ok(file) => file,
            Err(err) => return Outcome::refused(raw, err, origin.as_ref()),
        };
        let state = self.store.state(&file);
        let result = self
            .applier
            .snapshot(&file)
            .and_then(|snapshot| self.applier.apply(&file, edits, &snapshot));
        // Any speculative preview was discarded by the reload.
        self.sync_speculative(&file);
        match result {
            Ok(report) => {
                if self.store.get(&file).is_some() {
                    warn!(
                        path = %file.display(),
                        "direct apply bypassed a pending proposal; accepting it will fail as stale"
                    );
                }
                self.render(&file);
                let notifications = origin
                    .map(|target| Notification {
                        target,
                        envelope: Envelope::Status {
                            message: format!(
                                "applied {} edit(s) to {}",
                                report.edits_applied,
                                file.display()
                            ),
                            level: StatusLevel::Info,
                        },
                    })
                    .into_iter()
                    .collect();
                Outcome::done(file, state, notifications)
            }
            Err(err) => Outcome::failed(Some(file), state, err, origin.as_ref()),
        }
    }

    fn accept_all(&mut self, raw: &Path) -> Outcome {
        let file = match self.resolve_path(raw) {
            Ok(file) => file,
            Err(err) => return Outcome::failed(None, FileState::None, err, None),
        };
        let Some(proposal) = self.store.get(&file) else {
            debug!(path = %file.display(), "accept_all with no pending proposal");
            return Outcome::done(file, FileState::None, Vec::new());
        };
        let state = proposal.state();
        let origin = proposal.origin.clone();

        let applied = Rebased::of(proposal)
            .and_then(|rebased| self.applier.apply(&file, &rebased.edits, &rebased.base));
        if let Err(err) = applied {
            self.sync_speculative(&file);
            warn!(path = %file.display(), %err, "accept failed; proposal stays pending");
            return Outcome::failed(Some(file), state, err, origin.as_ref());
        }

        match self.store.resolve_all(&file, EditStatus::Accepted) {
            Ok(resolved) => self.finish(&file, &resolved),
            Err(err) => Outcome::failed(Some(file), state, err, origin.as_ref()),
        }
    }

    fn reject_all(&mut self, raw: &Path) -> Outcome {
        let file = match self.resolve_path(raw) {
            Ok(file) => file,
            Err(err) => return Outcome::failed(None, FileState::None, err, None),
        };
        let Some(proposal) = self.store.get(&file) else {
            debug!(path = %file.display(), "reject_all with no pending proposal");
            return Outcome::done(file, FileState::None, Vec::new());
        };
        let state = proposal.state();
        let origin = proposal.origin.clone();

        if proposal.speculative {
            if let Err(err) = self.applier.revert(&file) {
                return Outcome::failed(Some(file), state, err, origin.as_ref());
            }
        }

        match self.store.resolve_all(&file, EditStatus::Rejected) {
            Ok(resolved) => self.finish(&file, &resolved),
            Err(err) => Outcome::failed(Some(file), state, err, origin.as_ref()),
        }
    }

    fn resolve_one(&mut self, raw: &Path, index: usize, outcome: EditStatus) -> Outcome {
        let file = match self.resolve_path(raw) {
            Ok(file) => file,
            Err(err) => return Outcome::failed(None, FileState::None, err, None),
        };
        let Some(proposal) = self.store.get(&file).cloned() else {
            debug!(path = %file.display(), index, "edit decision with no pending proposal");
            return Outcome::done(file, FileState::None, Vec::new());
        };
        let state = proposal.state();
        let origin = proposal.origin.clone();

        let Some(status) = proposal.statuses.get(index) else {
            let err = AppError::OutOfBounds(format!(
                "edit index {index} out of range (len {})",
                proposal.statuses.len()
            ));
            return Outcome::failed(Some(file), state, err, None);
        };
        if status.is_terminal() {
            debug!(path = %file.display(), index, "edit already resolved");
            return Outcome::done(file, state, Vec::new());
        }

        let effect = if outcome == EditStatus::Accepted {
            self.accept_one(&file, &proposal, index)
        } else if proposal.speculative {
            self.applier.revert(&file).map(|_| ())
        } else {
            Ok(())
        };
        if let Err(err) = effect {
            self.sync_speculative(&file);
            warn!(
                path = %file.display(),
                index,
                %err,
                "edit decision failed; proposal stays pending"
            );
            return Outcome::failed(Some(file), state, err, origin.as_ref());
        }
        if let Some(proposal) = self.store.get_mut(&file) {
            proposal.speculative = false;
        }

        match self.store.resolve_edit(&file, index, outcome) {
            Ok(Resolution::Evicted(resolved)) => self.finish(&file, &resolved),
            Ok(Resolution::Pending { remaining }) => {
                debug!(path = %file.display(), index, remaining, "edit resolved");
                if self.preview == PreviewMode::Inline {
                    self.preview_pending(&file);
                }
                self.render(&file);
                Outcome::done(file, FileState::Partial, Vec::new())
            }
            Ok(Resolution::Unchanged) => Outcome::done(file, state, Vec::new()),
            Err(err) => Outcome::failed(Some(file), state, err, origin.as_ref()),
        }
    }

    fn accept_one(&mut self, file: &Path, proposal: &Proposal, index: usize) -> Result<()> {
        let edit = proposal
            .edits
            .get(index)
            .ok_or_else(|| AppError::OutOfBounds(format!("edit index {index} out of range")))?;
        let rebaser = Rebaser::new(&proposal.snapshot, proposal.accepted_edits())?;
        let live = rebaser.rebase(edit)?;
        self.applier
            .apply(file, std::slice::from_ref(&live), rebaser.base())
            .map(|_| ())
    }

    fn close(&mut self, raw: &Path) -> Outcome {
        let file = match self.resolve_path(raw) {
            Ok(file) => file,
            Err(err) => return Outcome::failed(None, FileState::None, err, None),
        };
        if let Some(closed) = self.store.clear(&file) {
            if closed.speculative {
                if let Err(err) = self.applier.revert(&file) {
                    warn!(path = %file.display(), %err, "failed to drop speculative preview");
                }
            }
            info!(
                path = %file.display(),
                proposal_id = %closed.id,
                state = ?closed.state(),
                "proposal closed"
            );
        }
        self.render(&file);
        Outcome::done(file, FileState::None, Vec::new())
    }

    fn session_closed(&mut self, session: &SessionId) -> Outcome {
        let mut orphaned = 0usize;
        for proposal in self.store.iter_mut() {
            if proposal.origin.as_ref() == Some(session) {
                proposal.origin = None;
                orphaned += 1;
            }
        }
        info!(
            session_id = %session,
            orphaned,
            "session closed; its proposals continue locally"
        );
        Outcome::idle()
    }

    /// Clear the presentation and emit the terminal notification.
    fn finish(&mut self, file: &Path, resolved: &Proposal) -> Outcome {
        self.render(file);
        let state = resolved.state();
        info!(
            path = %file.display(),
            proposal_id = %resolved.id,
            ?state,
            accepted = resolved.accepted_indices().len(),
            rejected = resolved.rejected_indices().len(),
            "proposal resolved"
        );
        Outcome::done(file.to_path_buf(), state, terminal_notification(resolved))
    }

    fn preview_pending(&mut self, file: &Path) {
        let Some(proposal) = self.store.get(file) else {
            return;
        };
        let previewed = Rebased::of(proposal).and_then(|rebased| {
            self.applier
                .preview(file, &rebased.edits, &rebased.base)
                .map(|()| !rebased.edits.is_empty())
        });
        let speculative = previewed.unwrap_or_else(|err| {
            warn!(
                path = %file.display(),
                %err,
                "inline preview failed; falling back to annotations"
            );
            false
        });
        if let Some(proposal) = self.store.get_mut(file) {
            proposal.speculative = speculative;
        }
    }

    /// After a failed or bypassing apply, trust the buffer over the flag.
    fn sync_speculative(&mut self, file: &Path) {
        let dirty = self.applier.has_unsaved(file).unwrap_or(false);
        if let Some(proposal) = self.store.get_mut(file) {
            proposal.speculative = proposal.speculative && dirty;
        }
    }

    /// Recompute annotations for `file` from the store.
    fn render(&mut self, file: &Path) {
        let annotations = match self.store.get(file).map(project) {
            Some(Ok(annotations)) => annotations,
            Some(Err(err)) => {
                warn!(path = %file.display(), %err, "cannot project proposal");
                Vec::new()
            }
            None => Vec::new(),
        };
        if let Err(err) = self.applier.annotate(file, annotations) {
            warn!(path = %file.display(), %err, "failed to update annotations");
        }
    }

    fn resolve_path(&self, raw: &Path) -> Result<PathBuf> {
        validate_workspace_path(&self.roots, raw)
    }
}

/// Notification owed to the originator of a proposal that left the store.
fn terminal_notification(resolved: &Proposal) -> Vec<Notification> {
    let Some(target) = resolved.origin.clone() else {
        debug!(path = %resolved.file.display(), "originator gone; notification dropped");
        return Vec::new();
    };
    let accepted = resolved.accepted_indices();
    let envelope = if accepted.is_empty() {
        Envelope::DiffRejected {
            file: resolved.file.clone(),
        }
    } else {
        Envelope::DiffAccepted {
            file: resolved.file.clone(),
            accepted,
            rejected: resolved.rejected_indices(),
        }
    };
    vec![Notification { target, envelope }]
}

/// A superseded proposal with accepted edits keeps them in the document; its
/// originator learns which ones landed. A fully pending one goes silently.
fn superseded(old: &Proposal) -> Vec<Notification> {
    let accepted = old.accepted_indices();
    if accepted.is_empty() {
        debug!(path = %old.file.display(), proposal_id = %old.id, "pending proposal superseded");
        return Vec::new();
    }
    warn!(
        path = %old.file.display(),
        proposal_id = %old.id,
        kept = accepted.len(),
        "partially accepted proposal superseded; accepted edits stay in the document"
    );
    let Some(target) = old.origin.clone() else {
        return Vec::new();
    };
    let mut rejected = old.rejected_indices();
    rejected.extend(old.pending_indices());
    rejected.sort_unstable();
    vec![
        Notification {
            target: target.clone(),
            envelope: Envelope::Status {
                message: format!(
                    "proposal for {} superseded after {} edit(s) were accepted",
                    old.file.display(),
                    accepted.len()
                ),
                level: StatusLevel::Warning,
            },
        },
        Notification {
            target,
            envelope: Envelope::DiffAccepted {
                file: old.file.clone(),
                accepted,
                rejected,
            },
        },
    ]
}
