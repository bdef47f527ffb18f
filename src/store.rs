//! Diff state store: the pending proposal for each file.
//!
//! The store is a plain keyed arena. The live instance is owned by the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) behind a lock, so every
//! mutation passes through its transition function.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{EditStatus, FileState, Proposal};
use crate::{AppError, Result};

/// Result of resolving a single edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The edit was already resolved; nothing changed.
    Unchanged,
    /// The edit was resolved and others remain pending.
    Pending {
        /// Edits still awaiting a decision.
        remaining: usize,
    },
    /// The last pending edit was resolved and the proposal left the store.
    Evicted(Proposal),
}

/// Map from file path to its single pending proposal.
#[derive(Debug, Default, Clone)]
pub struct DiffStore {
    entries: BTreeMap<PathBuf, Proposal>,
}

impl DiffStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `proposal`, replacing any pending proposal for the same file.
    ///
    /// Returns the superseded proposal. Its originator is not notified here.
    pub fn put_proposal(&mut self, proposal: Proposal) -> Option<Proposal> {
        let superseded = self.entries.insert(proposal.file.clone(), proposal);
        if let Some(ref old) = superseded {
            debug!(path = %old.file.display(), proposal_id = %old.id, "proposal superseded");
        }
        superseded
    }

    /// The pending proposal for `file`, if any.
    #[must_use]
    pub fn get(&self, file: &Path) -> Option<&Proposal> {
        self.entries.get(file)
    }

    /// Mutable access for in-place flags such as the speculative marker.
    pub fn get_mut(&mut self, file: &Path) -> Option<&mut Proposal> {
        self.entries.get_mut(file)
    }

    /// Lifecycle state of `file`.
    #[must_use]
    pub fn state(&self, file: &Path) -> FileState {
        self.entries.get(file).map_or(FileState::None, Proposal::state)
    }

    /// Resolve edit `index` of the proposal for `file`.
    ///
    /// Idempotent on an already-resolved index. Evicts the proposal once no
    /// edit is pending.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if `file` has no proposal.
    /// - `AppError::OutOfBounds` if `index` does not name an edit.
    pub fn resolve_edit(
        &mut self,
        file: &Path,
        index: usize,
        outcome: EditStatus,
    ) -> Result<Resolution> {
        let proposal = self.entries.get_mut(file).ok_or_else(|| no_proposal(file))?;
        if !proposal.resolve(index, outcome)? {
            return Ok(Resolution::Unchanged);
        }
        if proposal.is_terminal() {
            let evicted = self.entries.remove(file).ok_or_else(|| no_proposal(file))?;
            return Ok(Resolution::Evicted(evicted));
        }
        Ok(Resolution::Pending {
            remaining: proposal.pending_indices().len(),
        })
    }

    /// Resolve every pending edit of `file` with `outcome`, then evict.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `file` has no proposal.
    pub fn resolve_all(&mut self, file: &Path, outcome: EditStatus) -> Result<Proposal> {
        let mut proposal = self.entries.remove(file).ok_or_else(|| no_proposal(file))?;
        proposal.resolve_pending(outcome);
        Ok(proposal)
    }

    /// Evict `file` regardless of state.
    pub fn clear(&mut self, file: &Path) -> Option<Proposal> {
        self.entries.remove(file)
    }

    /// Proposals in path order.
    pub fn iter(&self) -> impl Iterator<Item = &Proposal> {
        self.entries.values()
    }

    /// Mutable proposals in path order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Proposal> {
        self.entries.values_mut()
    }

    /// Number of files with a pending proposal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no proposal is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn no_proposal(file: &Path) -> AppError {
    AppError::NotFound(format!("no pending proposal for {}", file.display()))
}
