//! Proposal model: a bundle of edits for one file awaiting a decision.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::edit::Edit;
use crate::models::session::SessionId;
use crate::{AppError, Result};

/// Resolution status of a single edit within a proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    /// Awaiting a decision.
    Pending,
    /// Accepted and written to the document.
    Accepted,
    /// Rejected; the document never saw it.
    Rejected,
}

impl EditStatus {
    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Per-file lifecycle state derived from the store contents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// No proposal is tracked for the file.
    None,
    /// A proposal exists and every edit is pending.
    Proposed,
    /// Some edits are resolved, others still pending.
    Partial,
    /// Every edit is resolved and at least one was accepted.
    Accepted,
    /// Every edit is resolved and all were rejected.
    Rejected,
}

/// A pending set of edits for a single file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    /// Unique proposal identifier.
    pub id: String,
    /// Normalized absolute path of the target file.
    pub file: PathBuf,
    /// Edits in the order the agent produced them.
    pub edits: Vec<Edit>,
    /// Human-readable summary shown next to the proposal.
    pub description: String,
    /// Status of each edit; aligned 1:1 with `edits`.
    pub statuses: Vec<EditStatus>,
    /// Persisted file content the edit ranges were computed against.
    pub snapshot: String,
    /// SHA-256 of `snapshot`, hex encoded.
    pub snapshot_digest: String,
    /// Session that proposed it; `None` once that peer is gone.
    pub origin: Option<SessionId>,
    /// Whether the edits are currently applied speculatively (inline preview).
    pub speculative: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// Construct a proposal with every edit pending.
    #[must_use]
    pub fn new(
        file: PathBuf,
        edits: Vec<Edit>,
        description: String,
        snapshot: String,
        origin: Option<SessionId>,
    ) -> Self {
        let statuses = vec![EditStatus::Pending; edits.len()];
        let snapshot_digest = content_digest(&snapshot);
        Self {
            id: Uuid::new_v4().to_string(),
            file,
            edits,
            description,
            statuses,
            snapshot,
            snapshot_digest,
            origin,
            speculative: false,
            created_at: Utc::now(),
        }
    }

    /// Target file path.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Set the status of edit `index`.
    ///
    /// Returns `Ok(false)` when the edit was already resolved; re-resolving
    /// is a no-op, never an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfBounds` if `index` does not name an edit.
    pub fn resolve(&mut self, index: usize, outcome: EditStatus) -> Result<bool> {
        let len = self.statuses.len();
        let status = self.statuses.get_mut(index).ok_or_else(|| {
            AppError::OutOfBounds(format!("edit index {index} out of range (len {len})"))
        })?;
        if status.is_terminal() || !outcome.is_terminal() {
            return Ok(false);
        }
        *status = outcome;
        Ok(true)
    }

    /// Apply `outcome` to every still-pending edit, returning how many changed.
    pub fn resolve_pending(&mut self, outcome: EditStatus) -> usize {
        if !outcome.is_terminal() {
            return 0;
        }
        let mut changed = 0;
        for status in &mut self.statuses {
            if *status == EditStatus::Pending {
                *status = outcome;
                changed += 1;
            }
        }
        changed
    }

    /// Whether every edit has a final status. An empty proposal is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.statuses.iter().all(|s| s.is_terminal())
    }

    /// Indices of edits still pending.
    #[must_use]
    pub fn pending_indices(&self) -> Vec<usize> {
        self.indices_with(EditStatus::Pending)
    }

    /// Indices of accepted edits.
    #[must_use]
    pub fn accepted_indices(&self) -> Vec<usize> {
        self.indices_with(EditStatus::Accepted)
    }

    /// Indices of rejected edits.
    #[must_use]
    pub fn rejected_indices(&self) -> Vec<usize> {
        self.indices_with(EditStatus::Rejected)
    }

    /// Edits that have been accepted so far, in proposal order.
    #[must_use]
    pub fn accepted_edits(&self) -> Vec<&Edit> {
        self.edits
            .iter()
            .zip(&self.statuses)
            .filter(|(_, s)| **s == EditStatus::Accepted)
            .map(|(e, _)| e)
            .collect()
    }

    /// Lifecycle state implied by the per-edit statuses.
    #[must_use]
    pub fn state(&self) -> FileState {
        let pending = self.statuses.iter().filter(|s| !s.is_terminal()).count();
        if pending == self.statuses.len() && pending > 0 {
            FileState::Proposed
        } else if pending > 0 {
            FileState::Partial
        } else if self.statuses.contains(&EditStatus::Accepted) {
            FileState::Accepted
        } else {
            FileState::Rejected
        }
    }

    fn indices_with(&self, wanted: EditStatus) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == wanted)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Hex-encoded SHA-256 of `content`.
#[must_use]
pub fn content_digest(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}
