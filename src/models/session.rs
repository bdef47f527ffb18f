//! Session identity.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one transport session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sits on the other end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PeerIdentity {
    /// A terminal-driven agent process.
    Terminal {
        /// Operating-system process id, when the peer reported one.
        process_id: Option<u32>,
        /// Workspace roots the agent operates in.
        workspace_roots: Vec<PathBuf>,
        /// Protocol version the peer speaks.
        client_version: String,
    },
    /// An editing surface instance.
    Editor {
        /// Random identifier of the editor instance.
        instance_id: String,
        /// Display name of the editor.
        peer_name: String,
        /// Protocol version the peer speaks.
        server_version: String,
    },
}
