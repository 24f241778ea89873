//! Media node cluster.
//!
//! Owns the set of media nodes, picks the least-loaded running node for new
//! sessions and turns connectivity callbacks into node state changes and
//! [`NodeEvent`]s.

pub mod load;
pub mod node;

pub use load::{LoadManager, SessionCountLoad};
pub use node::{MediaNode, NodeStatus};

use crate::errors::SfuError;
use crate::media::ReconnectOutcome;
use crate::observability::metrics;
use common::types::{NodeId, SessionId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument, warn};

/// Connectivity change published by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Connected {
        node: NodeId,
    },
    Disconnected {
        node: NodeId,
        disconnected_at_ms: i64,
    },
    ConnectionFailed {
        node: NodeId,
    },
    /// Reconnected to the same server instance; nothing was lost.
    Reconnected {
        node: NodeId,
    },
    /// Reconnected to a different server instance; every element built on the
    /// node before the disconnect is gone.
    InstanceReplaced {
        node: NodeId,
        epoch: u64,
        sessions: Vec<SessionId>,
        disconnected_at_ms: i64,
    },
}

/// The set of media nodes available to this controller.
pub struct NodeCluster {
    nodes: DashMap<NodeId, Arc<MediaNode>>,
    load_manager: Arc<dyn LoadManager>,
    // tokio's Mutex queues waiters in FIFO order.
    selection_lock: Mutex<()>,
    events_tx: broadcast::Sender<NodeEvent>,
}

impl NodeCluster {
    pub fn new(load_manager: Arc<dyn LoadManager>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            nodes: DashMap::new(),
            load_manager,
            selection_lock: Mutex::new(()),
            events_tx,
        }
    }

    /// Add a node. Adding an id that is already present is a no-op.
    ///
    /// # Returns
    ///
    /// `true` if the node was inserted.
    pub fn add_node(&self, node: Arc<MediaNode>) -> bool {
        match self.nodes.entry(node.id().clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(target: "sfu.cluster", node_id = %node.id(), uri = %node.uri(), "Media node added");
                slot.insert(node);
                true
            }
        }
    }

    /// Remove a node. Removing an unknown id is a no-op.
    pub fn remove_node(&self, id: &NodeId) -> Option<Arc<MediaNode>> {
        let removed = self.nodes.remove(id).map(|(_, node)| node);
        if let Some(node) = &removed {
            node.set_status(NodeStatus::Terminating);
            info!(target: "sfu.cluster", node_id = %id, "Media node removed");
        }
        removed
    }

    pub fn node(&self, id: &NodeId) -> Option<Arc<MediaNode>> {
        self.nodes.get(id).map(|n| Arc::clone(n.value()))
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> Vec<Arc<MediaNode>> {
        let mut nodes: Vec<Arc<MediaNode>> =
            self.nodes.iter().map(|n| Arc::clone(n.value())).collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    pub fn node_with_uri_exists(&self, uri: &str) -> bool {
        self.nodes.iter().any(|n| n.uri() == uri)
    }

    pub fn running_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_running()).count()
    }

    pub fn load(&self, node: &MediaNode) -> f64 {
        self.load_manager.load(node)
    }

    /// Every node with a freshly computed load, ascending by load.
    pub fn load_ranking(&self) -> Vec<(Arc<MediaNode>, f64)> {
        let mut ranking: Vec<(Arc<MediaNode>, f64)> = self
            .nodes()
            .into_iter()
            .map(|n| {
                let load = self.load_manager.load(&n);
                (n, load)
            })
            .collect();
        ranking.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranking
    }

    /// The connected, running node with the lowest load.
    ///
    /// # Errors
    ///
    /// Returns `SfuError::NoAvailableNode` if no node is connected and running.
    pub fn least_loaded_running_node(&self) -> Result<Arc<MediaNode>, SfuError> {
        self.load_ranking()
            .into_iter()
            .find(|(node, _)| node.is_running())
            .map(|(node, _)| node)
            .ok_or(SfuError::NoAvailableNode)
    }

    /// Select the least-loaded running node and bind `session` to it.
    ///
    /// Selection and binding happen under one cluster-wide lock so that two
    /// sessions created together see each other's reservation.
    ///
    /// # Errors
    ///
    /// Returns `SfuError::NoAvailableNode` if no node is connected and running.
    #[instrument(skip_all, name = "sfu.cluster.select", fields(session_id = %session))]
    pub async fn select_and_reserve(&self, session: &SessionId) -> Result<Arc<MediaNode>, SfuError> {
        let _guard = self.selection_lock.lock().await;
        match self.least_loaded_running_node() {
            Ok(node) => {
                node.bind_session(session);
                metrics::record_node_selection("selected");
                metrics::set_node_load(node.id().as_str(), self.load_manager.load(&node));
                info!(target: "sfu.cluster", node_id = %node.id(), "Session bound to media node");
                Ok(node)
            }
            Err(e) => {
                metrics::record_node_selection("no_available_node");
                warn!(target: "sfu.cluster", nodes = self.nodes.len(), "No running media node available");
                Err(e)
            }
        }
    }

    /// Unbind a session from its node.
    pub fn release_session(&self, node: &NodeId, session: &SessionId) {
        if let Some(node) = self.node(node) {
            if node.unbind_session(session) {
                metrics::set_node_load(node.id().as_str(), self.load_manager.load(&node));
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events_tx.subscribe()
    }

    fn publish(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    pub fn handle_connected(&self, id: &NodeId) {
        let Some(node) = self.node(id) else { return };
        node.mark_connected();
        metrics::record_node_event("connected");
        info!(target: "sfu.cluster", node_id = %id, "Media node connected");
        self.publish(NodeEvent::Connected { node: id.clone() });
    }

    /// Mark a node disconnected. Sessions on it are left alone.
    pub fn handle_disconnected(&self, id: &NodeId) {
        let Some(node) = self.node(id) else { return };
        let was_connected = node.is_connected();
        let disconnected_at_ms = node.mark_disconnected();
        if was_connected {
            metrics::record_node_event("disconnected");
            warn!(
                target: "sfu.cluster",
                node_id = %id,
                uri = %node.uri(),
                sessions = node.session_count(),
                "Media node disconnected"
            );
            self.publish(NodeEvent::Disconnected {
                node: id.clone(),
                disconnected_at_ms,
            });
        }
    }

    pub fn handle_connection_failed(&self, id: &NodeId) {
        let Some(node) = self.node(id) else { return };
        node.mark_connection_failed();
        metrics::record_node_event("connection_failed");
        warn!(target: "sfu.cluster", node_id = %id, uri = %node.uri(), "Media node connection failed");
        self.publish(NodeEvent::ConnectionFailed { node: id.clone() });
    }

    pub fn handle_reconnected(&self, id: &NodeId, outcome: ReconnectOutcome) {
        let Some(node) = self.node(id) else { return };
        let disconnected_at_ms = node.disconnected_at_ms();
        match outcome {
            ReconnectOutcome::SameInstance => {
                node.mark_connected();
                metrics::record_node_event("reconnected");
                info!(target: "sfu.cluster", node_id = %id, "Media node reconnected to the same instance");
                self.publish(NodeEvent::Reconnected { node: id.clone() });
            }
            ReconnectOutcome::NewInstance => {
                let epoch = node.bump_epoch();
                node.mark_connected();
                let sessions = node.sessions();
                metrics::record_node_event("instance_replaced");
                warn!(
                    target: "sfu.cluster",
                    node_id = %id,
                    epoch,
                    sessions = sessions.len(),
                    "Media node reconnected to a different instance; sessions must be resynchronized"
                );
                self.publish(NodeEvent::InstanceReplaced {
                    node: id.clone(),
                    epoch,
                    sessions,
                    disconnected_at_ms,
                });
            }
        }
    }
}
