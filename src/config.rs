//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::registry::Registry;
use crate::transport::session::SessionSettings;
use crate::{AppError, Result};

/// How pending proposals are shown in the document.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreviewMode {
    /// Annotations only; the buffer is untouched until a decision.
    #[default]
    Overlay,
    /// Edits are applied speculatively to the unsaved buffer.
    Inline,
}

/// Rendezvous record location and freshness.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RendezvousConfig {
    /// Record file; defaults to `$HOME/.editlink/ide/bridge.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Age after which a record is treated as absent.
    #[serde(default = "default_liveness_seconds")]
    pub liveness_seconds: u64,
    /// How often the host re-stamps its record.
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            path: None,
            liveness_seconds: default_liveness_seconds(),
            refresh_seconds: default_refresh_seconds(),
        }
    }
}

fn default_liveness_seconds() -> u64 {
    60
}

fn default_refresh_seconds() -> u64 {
    20
}

/// Session tuning and blocking-wait escapes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Outbound queue capacity per session, in envelopes.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    /// Longest a send waits for queue space.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Longest either side waits for the handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Longest the driver waits for a review decision.
    #[serde(default = "default_decision_timeout_seconds")]
    pub decision_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_buffer: default_send_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            decision_timeout_seconds: default_decision_timeout_seconds(),
        }
    }
}

fn default_send_buffer() -> usize {
    256
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_decision_timeout_seconds() -> u64 {
    30
}

fn default_endpoint() -> String {
    "editlink".into()
}

fn default_peer_name() -> String {
    "editlink".into()
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Local socket name the host listens on.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Display name published in the rendezvous record.
    #[serde(default = "default_peer_name")]
    pub peer_name: String,
    /// Directories edits may target; defaults to the current directory.
    #[serde(default)]
    pub workspace_roots: Vec<PathBuf>,
    /// Proposal presentation mode.
    #[serde(default)]
    pub preview: PreviewMode,
    /// Program the host launches with the endpoint exported.
    #[serde(default)]
    pub terminal_command: Option<String>,
    /// Rendezvous settings.
    #[serde(default)]
    pub rendezvous: RendezvousConfig,
    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            peer_name: default_peer_name(),
            workspace_roots: Vec::new(),
            preview: PreviewMode::default(),
            terminal_command: None,
            rendezvous: RendezvousConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, validated (so workspace roots are filled in).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the current directory is unusable.
    pub fn load_default() -> Result<Self> {
        let mut config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Replace the workspace roots and re-validate them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a root does not exist.
    pub fn set_workspace_roots(&mut self, roots: Vec<PathBuf>) -> Result<()> {
        self.workspace_roots = roots;
        self.validate()
    }

    /// Name of the local control socket.
    #[must_use]
    pub fn control_endpoint(&self) -> String {
        format!("{}-ctl", self.endpoint)
    }

    /// Session tuning derived from `[transport]`.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            send_buffer: self.transport.send_buffer,
            send_timeout: Duration::from_millis(self.transport.send_timeout_ms),
            handshake_timeout: Duration::from_millis(self.transport.handshake_timeout_ms),
        }
    }

    /// Longest the driver waits for a review decision.
    #[must_use]
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.decision_timeout_seconds)
    }

    /// Interval between rendezvous record refreshes.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.rendezvous.refresh_seconds)
    }

    /// Registry over the configured (or default) record path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no path is configured and no home
    /// directory is known.
    pub fn registry(&self) -> Result<Registry> {
        let path = match self.rendezvous.path.clone() {
            Some(path) => path,
            None => Registry::default_path().ok_or_else(|| {
                AppError::Config(
                    "no home directory; set rendezvous.path to place the record".into(),
                )
            })?,
        };
        Ok(Registry::new(
            path,
            Duration::from_secs(self.rendezvous.liveness_seconds),
        ))
    }

    fn validate(&mut self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(AppError::Config("endpoint must not be empty".into()));
        }
        if self.transport.send_buffer == 0 {
            return Err(AppError::Config(
                "transport.send_buffer must be greater than zero".into(),
            ));
        }
        if self.transport.send_timeout_ms == 0
            || self.transport.handshake_timeout_ms == 0
            || self.transport.decision_timeout_seconds == 0
        {
            return Err(AppError::Config(
                "transport timeouts must be greater than zero".into(),
            ));
        }
        if self.rendezvous.refresh_seconds == 0
            || self.rendezvous.refresh_seconds >= self.rendezvous.liveness_seconds
        {
            return Err(AppError::Config(
                "rendezvous.refresh_seconds must be non-zero and below liveness_seconds".into(),
            ));
        }

        if self.workspace_roots.is_empty() {
            let cwd = std::env::current_dir()
                .map_err(|err| AppError::Config(format!("current directory invalid: {err}")))?;
            warn!(root = %cwd.display(), "no workspace_roots configured, using current directory");
            self.workspace_roots.push(cwd);
        }

        let mut canonical = Vec::with_capacity(self.workspace_roots.len());
        for root in &self.workspace_roots {
            let resolved = root.canonicalize().map_err(|err| {
                AppError::Config(format!("workspace root {} invalid: {err}", root.display()))
            })?;
            if !canonical.contains(&resolved) {
                canonical.push(resolved);
            }
        }
        self.workspace_roots = canonical;

        Ok(())
    }
}
