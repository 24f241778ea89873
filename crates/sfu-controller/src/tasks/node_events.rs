//! Node event listener background task.
//!
//! Listens to cluster events and resynchronizes the sessions of a node that
//! came back as a different server instance.

use crate::cluster::NodeEvent;
use crate::session::SessionManager;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the listener until cancelled or the cluster is dropped.
pub async fn start_node_event_listener(
    manager: Arc<SessionManager>,
    cancel_token: CancellationToken,
) {
    let mut events = manager.cluster().subscribe();
    info!(target: "sfu.task.node_events", "Starting node event listener");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(NodeEvent::InstanceReplaced { node, sessions, disconnected_at_ms, .. }) => {
                    manager
                        .resynchronize_node_sessions(&node, &sessions, disconnected_at_ms)
                        .await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "sfu.task.node_events", skipped, "Node event listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
            () = cancel_token.cancelled() => {
                info!(target: "sfu.task.node_events", "Node event listener received shutdown signal, exiting");
                break;
            }
        }
    }
}
