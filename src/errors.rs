//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// None of these are fatal to the host process. Protocol errors are answered
/// with an `error` envelope, transport errors downgrade the caller to
/// standalone mode, and apply errors leave the proposal pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed or unexpected envelope on the wire.
    Protocol(String),
    /// Inbound envelope carried a `type` no handler exists for.
    UnknownMessage(String),
    /// Connection, handshake, or peer-vanished failure.
    Transport(String),
    /// Peer did not present this host's auth token.
    Unauthorized(String),
    /// Edit application failed; the document is unchanged.
    Apply(String),
    /// Live document no longer matches the proposal snapshot, even after reload.
    StaleDocument(String),
    /// Two edits of one proposal cover intersecting ranges.
    Overlap(String),
    /// A position does not address a valid location in the document.
    OutOfBounds(String),
    /// File system path failed validation against the workspace roots.
    PathViolation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Rendezvous record could not be published or removed.
    Registry(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Stable machine-readable code carried in `error{code}` envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Protocol(_) => "protocol_violation",
            Self::UnknownMessage(_) => "unknown_type",
            Self::Transport(_) => "transport",
            Self::Unauthorized(_) => "unauthorized",
            Self::Apply(_) => "apply_failed",
            Self::StaleDocument(_) => "stale_document",
            Self::Overlap(_) => "overlapping_edits",
            Self::OutOfBounds(_) => "out_of_bounds",
            Self::PathViolation(_) => "path_violation",
            Self::NotFound(_) => "not_found",
            Self::Registry(_) => "registry",
            Self::Io(_) => "io",
        }
    }

    /// Whether this failure came out of the edit applier.
    #[must_use]
    pub fn is_apply_failure(&self) -> bool {
        matches!(
            self,
            Self::Apply(_)
                | Self::StaleDocument(_)
                | Self::Overlap(_)
                | Self::OutOfBounds(_)
                | Self::PathViolation(_)
                | Self::Io(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::UnknownMessage(msg) => write!(f, "unknown message: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Apply(msg) => write!(f, "apply: {msg}"),
            Self::StaleDocument(msg) => write!(f, "stale document: {msg}"),
            Self::Overlap(msg) => write!(f, "overlapping edits: {msg}"),
            Self::OutOfBounds(msg) => write!(f, "out of bounds: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
