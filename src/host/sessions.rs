//! Live sessions by id, and delivery of dispatcher notifications to them.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dispatcher::Notification;
use crate::models::SessionId;
use crate::transport::session::SessionHandle;

/// Directory of connected sessions.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `session`.
    pub async fn insert(&self, session: SessionHandle) {
        self.sessions
            .lock()
            .await
            .insert(session.id().clone(), session);
    }

    /// Stop tracking `id`, returning its handle if it was known.
    pub async fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.lock().await.remove(id)
    }

    /// Handle for `id`.
    pub async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Number of tracked sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is tracked.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Every tracked session.
    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Send each notification to its target, in order.
    ///
    /// A vanished target or a failed send is logged and skipped; the
    /// dispatcher has already committed the state change.
    pub async fn deliver(&self, notifications: Vec<Notification>) {
        for Notification { target, envelope } in notifications {
            let Some(handle) = self.get(&target).await else {
                debug!(session_id = %target, kind = envelope.kind(), "recipient gone; dropped");
                continue;
            };
            let kind = envelope.kind();
            if let Err(err) = handle.send(envelope).await {
                warn!(session_id = %target, kind, %err, "notification delivery failed");
            }
        }
    }

    /// Close every session and forget them.
    pub async fn close_all(&self) {
        let drained: Vec<SessionHandle> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.close();
        }
    }
}
