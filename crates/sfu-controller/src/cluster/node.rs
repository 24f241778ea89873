//! Handle to one media-processing node.

use crate::media::MediaEngine;
use chrono::Utc;
use common::types::{NodeId, SessionId};
use dashmap::DashSet;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Launching,
    Running,
    Terminating,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Launching => "launching",
            NodeStatus::Running => "running",
            NodeStatus::Terminating => "terminating",
        }
    }
}

/// A media node and its connectivity bookkeeping.
///
/// The epoch increases every time the node is found to be a different server
/// instance after a reconnect. Anything built on the node remembers the epoch
/// it was built under and is rebuilt when the two disagree.
pub struct MediaNode {
    id: NodeId,
    uri: String,
    engine: Arc<dyn MediaEngine>,
    connected: AtomicBool,
    status: RwLock<NodeStatus>,
    connected_at_ms: AtomicI64,
    disconnected_at_ms: AtomicI64,
    epoch: AtomicU64,
    sessions: DashSet<SessionId>,
}

impl MediaNode {
    /// New node in `Running` status, not yet connected.
    pub fn new(id: NodeId, uri: impl Into<String>, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            id,
            uri: uri.into(),
            engine,
            connected: AtomicBool::new(false),
            status: RwLock::new(NodeStatus::Running),
            connected_at_ms: AtomicI64::new(0),
            disconnected_at_ms: AtomicI64::new(0),
            epoch: AtomicU64::new(0),
            sessions: DashSet::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    /// Connected and in `Running` status.
    pub fn is_running(&self) -> bool {
        self.is_connected() && self.status() == NodeStatus::Running
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Milliseconds since the Unix epoch of the last successful connect.
    pub fn connected_at_ms(&self) -> i64 {
        self.connected_at_ms.load(Ordering::SeqCst)
    }

    /// Milliseconds since the Unix epoch of the last disconnect, 0 when connected.
    pub fn disconnected_at_ms(&self) -> i64 {
        self.disconnected_at_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.connected_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.disconnected_at_ms.store(0, Ordering::SeqCst);
    }

    /// Returns the recorded disconnection time.
    pub(crate) fn mark_disconnected(&self) -> i64 {
        self.connected.store(false, Ordering::SeqCst);
        let now = Utc::now().timestamp_millis();
        // Keep the first disconnection time across repeated failures.
        match self
            .disconnected_at_ms
            .compare_exchange(0, now, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => now,
            Err(existing) => existing,
        }
    }

    pub(crate) fn mark_connection_failed(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Returns the new epoch.
    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn bind_session(&self, session: &SessionId) {
        self.sessions.insert(session.clone());
    }

    pub(crate) fn unbind_session(&self, session: &SessionId) -> bool {
        self.sessions.remove(session).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }
}

impl fmt::Debug for MediaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaNode")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("status", &self.status())
            .field("epoch", &self.epoch())
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}
