//! Session registry
//!
//! Maps authenticated identity keys to live connections and enforces the
//! single-connection invariant: binding an identity that is already bound
//! atomically supersedes the old connection. Entries cache identity data
//! (profile, permissions, last-active time) across a disconnect so handlers
//! and push paths never reload it per frame; an explicit logout removes the
//! entry outright.

use std::collections::HashSet;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use wavelink_core::Frame;

use crate::router::AuthenticatedIdentity;

// ----------------------------------------------------------------------------
// Registry Entry
// ----------------------------------------------------------------------------

struct RegistryEntry {
    /// Outbound sender of the owning connection; `None` after a disconnect,
    /// with the entry retained for its cached identity data until logout
    sender: Option<UnboundedSender<Frame>>,
    /// Connection currently owning this identity
    conn_id: Option<u64>,
    last_active: Instant,
    identity: AuthenticatedIdentity,
}

/// Why a push to an identity failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Identity has never been bound
    UnknownIdentity,
    /// Identity is known but has no live connection
    NotConnected,
}

// ----------------------------------------------------------------------------
// Session Registry
// ----------------------------------------------------------------------------

/// Shared registry of authenticated sessions
#[derive(Default)]
pub struct SessionRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an identity to a connection.
    ///
    /// If the identity is already bound to another connection, the old
    /// binding is replaced in the same map operation and the superseded
    /// connection's id is returned so the caller can close it. Frames pushed
    /// after the swap reach only the new connection.
    pub fn bind(
        &self,
        identity: AuthenticatedIdentity,
        conn_id: u64,
        sender: UnboundedSender<Frame>,
    ) -> Option<u64> {
        let mut superseded = None;
        self.entries
            .entry(identity.id.clone())
            .and_modify(|entry| {
                superseded = entry.conn_id.filter(|old| *old != conn_id);
                entry.sender = Some(sender.clone());
                entry.conn_id = Some(conn_id);
                entry.last_active = Instant::now();
                entry.identity = identity.clone();
            })
            .or_insert_with(|| RegistryEntry {
                sender: Some(sender),
                conn_id: Some(conn_id),
                last_active: Instant::now(),
                identity,
            });
        superseded
    }

    /// Remove an identity's entry entirely (explicit logout)
    pub fn unbind(&self, identity_id: &str) {
        self.entries.remove(identity_id);
    }

    /// Release a binding when its connection closes.
    ///
    /// No-op if the identity has already been rebound to a newer connection;
    /// the stale close must not tear down the successor's binding.
    pub fn unbind_connection(&self, identity_id: &str, conn_id: u64) {
        if let Some(mut entry) = self.entries.get_mut(identity_id) {
            if entry.conn_id == Some(conn_id) {
                entry.sender = None;
                entry.conn_id = None;
            }
        }
    }

    /// Push an unsolicited frame to an identity's live connection
    pub fn push(&self, identity_id: &str, frame: Frame) -> Result<(), PushError> {
        let entry = self
            .entries
            .get(identity_id)
            .ok_or(PushError::UnknownIdentity)?;
        let sender = entry.sender.as_ref().ok_or(PushError::NotConnected)?;
        sender.send(frame).map_err(|_| PushError::NotConnected)
    }

    /// Refresh the last-active timestamp for an identity
    pub fn touch(&self, identity_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(identity_id) {
            entry.last_active = Instant::now();
        }
    }

    /// Whether an identity currently has a live connection
    pub fn is_connected(&self, identity_id: &str) -> bool {
        self.entries
            .get(identity_id)
            .map(|entry| entry.sender.is_some())
            .unwrap_or(false)
    }

    /// Cached permission flags for an identity
    pub fn permissions(&self, identity_id: &str) -> Option<HashSet<String>> {
        self.entries
            .get(identity_id)
            .map(|entry| entry.identity.permissions.clone())
    }

    /// Idle time since the identity's last recorded activity
    pub fn idle_time(&self, identity_id: &str) -> Option<std::time::Duration> {
        self.entries
            .get(identity_id)
            .map(|entry| entry.last_active.elapsed())
    }

    /// Number of identities with a live connection
    pub fn connected_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.sender.is_some())
            .count()
    }

    /// Number of registered identities, connected or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry; called at server shutdown
    pub fn clear(&self) {
        self.entries.clear();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
