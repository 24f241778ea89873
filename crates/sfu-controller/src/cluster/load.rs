//! Node load metrics.

use super::node::MediaNode;

/// Computes a node's load. Lower is less loaded.
pub trait LoadManager: Send + Sync {
    fn load(&self, node: &MediaNode) -> f64;
}

/// Load as the fraction of a fixed per-node session capacity in use.
#[derive(Debug, Clone, Copy)]
pub struct SessionCountLoad {
    capacity: u32,
}

impl SessionCountLoad {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

impl LoadManager for SessionCountLoad {
    fn load(&self, node: &MediaNode) -> f64 {
        #[allow(clippy::cast_precision_loss)] // session counts are far below 2^52
        let sessions = node.session_count() as f64;
        sessions / f64::from(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mock::MockMediaEngine;
    use common::types::{NodeId, SessionId};
    use std::sync::Arc;

    #[test]
    fn test_session_count_load() {
        let node = MediaNode::new(
            NodeId::new("kms_B"),
            "ws://b",
            Arc::new(MockMediaEngine::new()),
        );
        let load = SessionCountLoad::new(4);
        assert!((load.load(&node) - 0.0).abs() < f64::EPSILON);

        node.bind_session(&SessionId::new("ses_1"));
        assert!((load.load(&node) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let node = MediaNode::new(
            NodeId::new("kms_C"),
            "ws://c",
            Arc::new(MockMediaEngine::new()),
        );
        node.bind_session(&SessionId::new("ses_1"));
        assert!((SessionCountLoad::new(0).load(&node) - 1.0).abs() < f64::EPSILON);
    }
}
