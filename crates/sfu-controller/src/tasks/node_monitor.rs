//! Media node monitor background task.
//!
//! Every tick, connected nodes are pinged and disconnected nodes are
//! reconnected. The cluster turns the results into node state changes and
//! events; readiness follows the number of running nodes.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered, after finishing
//! the current pass.

use crate::cluster::NodeCluster;
use crate::observability::HealthState;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Run the node monitor until cancelled.
pub async fn start_node_monitor(
    cluster: Arc<NodeCluster>,
    health_state: Arc<HealthState>,
    check_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sfu.task.node_monitor",
        interval_seconds = check_interval.as_secs(),
        "Starting node monitor task"
    );

    let mut interval = tokio::time::interval(check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                check_nodes(&cluster).await;
                health_state.set_running_nodes(cluster.running_count());
            }
            () = cancel_token.cancelled() => {
                info!(target: "sfu.task.node_monitor", "Node monitor task received shutdown signal, exiting");
                break;
            }
        }
    }
}

/// One monitoring pass over every node.
#[instrument(skip_all, name = "sfu.task.node_monitor.check")]
pub async fn check_nodes(cluster: &NodeCluster) {
    for node in cluster.nodes() {
        if node.is_connected() {
            if let Err(e) = node.engine().ping().await {
                warn!(target: "sfu.task.node_monitor", node_id = %node.id(), error = %e, "Media node ping failed");
                cluster.handle_disconnected(node.id());
            }
            continue;
        }

        let never_connected = node.connected_at_ms() == 0;
        match node.engine().reconnect().await {
            Ok(_) if never_connected => cluster.handle_connected(node.id()),
            Ok(outcome) => cluster.handle_reconnected(node.id(), outcome),
            Err(e) if never_connected => {
                debug!(target: "sfu.task.node_monitor", node_id = %node.id(), error = %e, "Media node still unreachable");
                cluster.handle_connection_failed(node.id());
            }
            Err(e) => {
                debug!(target: "sfu.task.node_monitor", node_id = %node.id(), error = %e, "Media node reconnect failed");
            }
        }
    }
}
