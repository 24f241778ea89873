//! Per-participant media endpoints.
//!
//! A participant owns one [`EndpointOrchestrator`], which owns at most one
//! publisher endpoint (its outgoing media) and one subscriber endpoint per
//! remote participant it receives media from. Endpoints are built
//! asynchronously on the session's media node; callers wait on a one-shot
//! readiness signal with a bounded timeout.

pub mod filter;
pub mod media_endpoint;
pub mod orchestrator;
pub mod publisher;
pub mod readiness;
pub mod subscriber;

pub use filter::{Filter, FilterSet};
pub use media_endpoint::MediaEndpoint;
pub use orchestrator::EndpointOrchestrator;
pub use publisher::PublisherEndpoint;
pub use readiness::{Readiness, ReadinessError, ReadyState};
pub use subscriber::SubscriberEndpoint;

use crate::cluster::MediaNode;
use crate::collaborators::{CdrSink, RecordingCoordinator, SignalingTransport};
use crate::media::{ElementId, ErrorClassifier, MediaEngine};
use std::sync::Arc;
use std::time::Duration;

/// Shared dependencies of every endpoint in the process.
pub struct EndpointContext {
    pub signaling: Arc<dyn SignalingTransport>,
    pub cdr: Arc<dyn CdrSink>,
    pub recording: Arc<dyn RecordingCoordinator>,
    pub classifier: ErrorClassifier,
    pub endpoint_timeout: Duration,
}

/// Location of a built media element.
///
/// For a session pipeline `element` and `pipeline` are the same handle.
#[derive(Debug, Clone)]
pub struct MediaBinding {
    pub node: Arc<MediaNode>,
    /// Node epoch at build time.
    pub epoch: u64,
    pub pipeline: ElementId,
    pub element: ElementId,
}

impl MediaBinding {
    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        self.node.engine()
    }

    /// `false` once the node has been replaced by a new server instance.
    pub fn is_current(&self) -> bool {
        self.node.epoch() == self.epoch
    }
}
