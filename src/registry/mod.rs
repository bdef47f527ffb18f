//! Rendezvous registry: how a terminal driver finds a running editor host.
//!
//! The host publishes a [`RendezvousRecord`] to a per-user file with
//! owner-only permissions and exports its endpoint and auth token to the
//! terminals it spawns through [`ENDPOINT_ENV`] and [`TOKEN_ENV`]. Drivers
//! check the environment first and fall back to the file. The token is what
//! keeps other local users off the host's sockets, so it only ever travels
//! through these two owner-only channels. A record counts only while its process is alive
//! and its timestamp is within the liveness window; anything else reads as
//! absent.
//!
//! Writers replace the whole file atomically, so the last writer wins and a
//! reader sees either a complete record or none.

pub mod liveness;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::diff::writer::write_private_file;
use crate::{AppError, Result};

pub use liveness::process_is_alive;

/// Environment variable carrying the endpoint into spawned terminals.
pub const ENDPOINT_ENV: &str = "EDITLINK_ENDPOINT";

/// Environment variable carrying the host's auth token into spawned terminals.
pub const TOKEN_ENV: &str = "EDITLINK_TOKEN";

/// Discovery artifact published by the editor host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RendezvousRecord {
    /// Local socket name to connect to.
    pub endpoint: String,
    /// Process id of the publishing host.
    pub process_id: u32,
    /// Display name of the publishing host.
    pub peer_name: String,
    /// Workspace roots the host serves.
    pub workspace_roots: Vec<PathBuf>,
    /// Last time the host vouched for this record.
    pub timestamp: DateTime<Utc>,
    /// Secret connectors present in their handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Where a discovered endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    /// Inherited through [`ENDPOINT_ENV`].
    Environment,
    /// Read from the record file.
    RecordFile,
}

/// A usable endpoint found by [`Registry::discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Local socket name to connect to.
    pub endpoint: String,
    /// Where it came from.
    pub source: DiscoverySource,
    /// The record, when read from the file.
    pub record: Option<RendezvousRecord>,
    /// Token to present when connecting.
    pub auth_token: Option<String>,
}

/// Publish/discover/retract over one record file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    liveness: Duration,
}

impl Registry {
    /// Registry over the record at `path`.
    #[must_use]
    pub fn new(path: PathBuf, liveness: Duration) -> Self {
        Self { path, liveness }
    }

    /// `$HOME/.editlink/ide/bridge.json`, if a home directory is known.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .filter(|home| !home.is_empty())
            .map(|home| {
                PathBuf::from(home)
                    .join(".editlink")
                    .join("ide")
                    .join("bridge.json")
            })
    }

    /// Location of the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Liveness window applied to record timestamps.
    #[must_use]
    pub fn liveness(&self) -> Duration {
        self.liveness
    }

    /// Write a record for this process, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the file cannot be written.
    pub fn publish(
        &self,
        endpoint: &str,
        peer_name: &str,
        workspace_roots: &[PathBuf],
        auth_token: Option<&str>,
    ) -> Result<RendezvousRecord> {
        let record = RendezvousRecord {
            endpoint: endpoint.to_owned(),
            process_id: std::process::id(),
            peer_name: peer_name.to_owned(),
            workspace_roots: workspace_roots.to_vec(),
            timestamp: Utc::now(),
            auth_token: auth_token.map(str::to_owned),
        };
        self.write(&record)?;
        info!(path = %self.path.display(), endpoint, "rendezvous record published");
        Ok(record)
    }

    /// Bump the timestamp of `record` and rewrite it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the file cannot be written.
    pub fn refresh(&self, record: &mut RendezvousRecord) -> Result<()> {
        record.timestamp = Utc::now();
        self.write(record)?;
        debug!(path = %self.path.display(), "rendezvous record refreshed");
        Ok(())
    }

    /// Read the record file without judging freshness.
    ///
    /// A missing, vanished, or unparsable file reads as `None`.
    #[must_use]
    pub fn read(&self) -> Option<RendezvousRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), %err, "cannot read rendezvous record");
                }
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "ignoring unparsable rendezvous record");
                None
            }
        }
    }

    /// Whether `record` is usable at `now`: its process is alive and its
    /// timestamp is neither older than the liveness window nor in the future
    /// by more than that window.
    #[must_use]
    pub fn is_fresh(&self, record: &RendezvousRecord, now: DateTime<Utc>) -> bool {
        let Ok(window) = chrono::Duration::from_std(self.liveness) else {
            return false;
        };
        let age = now.signed_duration_since(record.timestamp);
        age <= window && age >= -window && process_is_alive(record.process_id)
    }

    /// Find an endpoint: [`ENDPOINT_ENV`] first, then a fresh record.
    ///
    /// Discovery failure is not an error; `None` means run standalone.
    #[must_use]
    pub fn discover(&self) -> Option<Discovered> {
        self.discover_with_env(std::env::var(ENDPOINT_ENV).ok(), std::env::var(TOKEN_ENV).ok())
    }

    /// [`Self::discover`] with the environment values supplied by the caller.
    #[must_use]
    pub fn discover_with_env(
        &self,
        env_endpoint: Option<String>,
        env_token: Option<String>,
    ) -> Option<Discovered> {
        if let Some(endpoint) = env_endpoint.filter(|e| !e.trim().is_empty()) {
            debug!(%endpoint, "endpoint inherited from environment");
            return Some(Discovered {
                endpoint,
                source: DiscoverySource::Environment,
                record: None,
                auth_token: env_token.filter(|t| !t.is_empty()),
            });
        }

        let record = self.read()?;
        if !self.is_fresh(&record, Utc::now()) {
            info!(
                path = %self.path.display(),
                process_id = record.process_id,
                timestamp = %record.timestamp,
                "ignoring stale rendezvous record"
            );
            return None;
        }
        Some(Discovered {
            endpoint: record.endpoint.clone(),
            source: DiscoverySource::RecordFile,
            auth_token: record.auth_token.clone(),
            record: Some(record),
        })
    }

    /// Delete the record file. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if an existing file cannot be removed.
    pub fn retract(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "rendezvous record retracted");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::Registry(format!(
                "failed to remove {}: {err}",
                self.path.display()
            ))),
        }
    }

    /// Delete the record only if it still names `process_id` and `endpoint`.
    ///
    /// A host restarting over the same file must not have its fresh record
    /// removed by the old instance's shutdown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the file cannot be removed.
    pub fn retract_if_owned(&self, process_id: u32, endpoint: &str) -> Result<bool> {
        match self.read() {
            Some(record) if record.process_id == process_id && record.endpoint == endpoint => {
                self.retract()
            }
            _ => Ok(false),
        }
    }

    fn write(&self, record: &RendezvousRecord) -> Result<()> {
        let raw = serde_json::to_string_pretty(record)
            .map_err(|err| AppError::Registry(format!("failed to serialize record: {err}")))?;
        write_private_file(&self.path, &raw)
            .map(|_| ())
            .map_err(|err| AppError::Registry(err.to_string()))
    }
}

/// Keep `record` fresh until `cancel` fires.
///
/// Each tick re-stamps the record. A failed write is logged and retried on
/// the next tick.
pub fn spawn_refresh_task(
    registry: Registry,
    mut record: RendezvousRecord,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; the record was just written.
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("rendezvous refresh task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = registry.refresh(&mut record) {
                        warn!(%err, "rendezvous refresh failed");
                    }
                }
            }
        }
    })
}
