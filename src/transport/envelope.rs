//! Wire envelopes.
//!
//! Every message is one JSON object per line with a `type` discriminator:
//!
//! ```json
//! {"type":"connect","clientVersion":"0.1.0"}
//! {"type":"proposeDiff","file":"/ws/a.py","edits":[...],"description":"fix"}
//! {"type":"diffAccepted","file":"/ws/a.py"}
//! {"type":"error","message":"unknown message type: frobnicate","code":"unknown_type"}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Edit;
use crate::{AppError, Result};

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capability advertising per-edit proposals with asynchronous decisions.
pub const CAP_PROPOSE_DIFF: &str = "proposeDiff";
/// Capability advertising whole-document previews.
pub const CAP_OPEN_DIFF: &str = "openDiff";
/// Capability advertising the direct-apply path.
pub const CAP_APPLY_DIFF: &str = "applyDiff";
/// Capability advertising `closeDiff`.
pub const CAP_CLOSE_DIFF: &str = "closeDiff";
/// Capability advertising advisory status messages.
pub const CAP_STATUS: &str = "status";

/// Capabilities the editor host offers.
#[must_use]
pub fn host_capabilities() -> Vec<String> {
    [
        CAP_PROPOSE_DIFF,
        CAP_OPEN_DIFF,
        CAP_APPLY_DIFF,
        CAP_CLOSE_DIFF,
        CAP_STATUS,
    ]
    .iter()
    .map(|c| (*c).to_owned())
    .collect()
}

/// Severity of an advisory status message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    /// Informational.
    #[default]
    Info,
    /// Something worth the user's attention.
    Warning,
    /// A failure.
    Error,
}

/// A message on the wire, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// First message from the connecting side.
    Connect {
        /// Connector's protocol version.
        client_version: String,
        /// Connector's process id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process_id: Option<u32>,
        /// Workspace roots the connector operates in.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        workspace_roots: Vec<PathBuf>,
        /// Secret the listening host published for this run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    /// Reply to `connect`; the session is usable afterwards.
    Connected {
        /// Listener's protocol version.
        server_version: String,
        /// Message kinds the listener handles.
        #[serde(default)]
        capabilities: Vec<String>,
        /// Display name of the listener.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_name: Option<String>,
        /// Identifier of the listening editor instance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
    },
    /// Offer edits for review. No immediate reply.
    ProposeDiff {
        /// Target file.
        file: PathBuf,
        /// Edits against the file's current persisted content.
        edits: Vec<Edit>,
        /// Summary for the reviewer.
        #[serde(default)]
        description: String,
    },
    /// Offer a whole-document change for review.
    OpenDiff {
        /// Target file.
        file: PathBuf,
        /// Full text before the change.
        before: String,
        /// Full text after the change.
        after: String,
        /// Summary for the reviewer.
        #[serde(default)]
        description: String,
    },
    /// Apply edits unconditionally, bypassing review.
    ApplyDiff {
        /// Target file.
        file: PathBuf,
        /// Edits against the file's current persisted content.
        edits: Vec<Edit>,
    },
    /// Drop any pending proposal for the file.
    CloseDiff {
        /// Target file.
        file: PathBuf,
    },
    /// The proposal for `file` was resolved with at least one accepted edit.
    DiffAccepted {
        /// Target file.
        file: PathBuf,
        /// Indices of accepted edits.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        accepted: Vec<usize>,
        /// Indices of rejected edits.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rejected: Vec<usize>,
    },
    /// The proposal for `file` was rejected entirely.
    DiffRejected {
        /// Target file.
        file: PathBuf,
    },
    /// Advisory progress message.
    Status {
        /// Text to show.
        message: String,
        /// Severity.
        #[serde(default)]
        level: StatusLevel,
    },
    /// Failure report.
    Error {
        /// Human-readable description.
        message: String,
        /// Stable machine-readable code.
        #[serde(default)]
        code: String,
        /// File the failed request addressed, when there was one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
    },
    /// Agent text response for display.
    Response {
        /// Response body.
        content: String,
    },
    /// Notification that the agent ran a tool.
    ToolExecuted {
        /// Tool name.
        tool: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: Value,
        /// Tool output.
        #[serde(default)]
        result: String,
    },
}

/// Every `type` value with a handler.
pub const KNOWN_KINDS: &[&str] = &[
    "connect",
    "connected",
    "proposeDiff",
    "openDiff",
    "applyDiff",
    "closeDiff",
    "diffAccepted",
    "diffRejected",
    "status",
    "error",
    "response",
    "toolExecuted",
];

impl Envelope {
    /// Wire name of this envelope's `type`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Connected { .. } => "connected",
            Self::ProposeDiff { .. } => "proposeDiff",
            Self::OpenDiff { .. } => "openDiff",
            Self::ApplyDiff { .. } => "applyDiff",
            Self::CloseDiff { .. } => "closeDiff",
            Self::DiffAccepted { .. } => "diffAccepted",
            Self::DiffRejected { .. } => "diffRejected",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Response { .. } => "response",
            Self::ToolExecuted { .. } => "toolExecuted",
        }
    }

    /// Error envelope describing `err`.
    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        Self::error_for(err, None)
    }

    /// Error envelope describing `err` for a request about `file`.
    #[must_use]
    pub fn error_for(err: &AppError, file: Option<PathBuf>) -> Self {
        Self::Error {
            message: err.to_string(),
            code: err.code().to_owned(),
            file,
        }
    }

    /// Serialize to a single JSON line without the terminator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| AppError::Protocol(format!("failed to serialize {}: {err}", self.kind())))
    }
}

/// Parse one inbound line.
///
/// - `Ok(None)`: blank line, skipped.
/// - `Err(AppError::Protocol)`: not JSON, no `type`, or bad fields.
/// - `Err(AppError::UnknownMessage)`: a `type` nothing handles.
///
/// # Errors
///
/// See above. Callers answer errors with an `error` envelope and keep the
/// session open.
pub fn parse_inbound_line(line: &str) -> Result<Option<Envelope>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|err| AppError::Protocol(format!("malformed json: {err}")))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Protocol("missing string field 'type'".into()))?
        .to_owned();

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Err(AppError::UnknownMessage(format!(
            "unknown message type: {kind}"
        )));
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| AppError::Protocol(format!("invalid {kind}: {err}")))
}
