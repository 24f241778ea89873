//! In-process control plane backed by mock media nodes.
//!
//! Wires a real `SessionManager` and `NodeCluster` to `MockMediaEngine`
//! nodes and capturing collaborators, so tests can drive session and
//! endpoint operations directly and inspect what reached the media nodes.

use common::types::{NodeId, SessionId};
use sfu_controller::cluster::{MediaNode, NodeCluster, SessionCountLoad};
use sfu_controller::collaborators::cdr::mock::RecordingCdrSink;
use sfu_controller::collaborators::recording::mock::MockRecordingCoordinator;
use sfu_controller::collaborators::signaling::mock::CapturingSignalingTransport;
use sfu_controller::collaborators::{Collaborators, DefaultTokenIssuer};
use sfu_controller::config::{EmptySessionPolicy, DEFAULT_BENIGN_ERROR_CODE};
use sfu_controller::media::mock::MockMediaEngine;
use sfu_controller::models::{Role, SessionProperties};
use sfu_controller::session::{JoinRequest, ManagerSettings, Participant, SessionManager};
use std::sync::Arc;
use std::time::Duration;

/// Knobs for [`TestControlPlane::with_options`].
#[derive(Debug, Clone)]
pub struct ControlPlaneOptions {
    /// Number of mock media nodes, all connected.
    pub nodes: usize,
    pub node_capacity: u32,
    pub empty_session_policy: EmptySessionPolicy,
    pub recording_enabled: bool,
    pub endpoint_timeout: Duration,
}

impl Default for ControlPlaneOptions {
    fn default() -> Self {
        Self {
            nodes: 1,
            node_capacity: 10,
            empty_session_policy: EmptySessionPolicy::Destroy,
            recording_enabled: true,
            endpoint_timeout: Duration::from_secs(2),
        }
    }
}

pub struct TestControlPlane {
    pub manager: Arc<SessionManager>,
    pub cluster: Arc<NodeCluster>,
    pub engines: Vec<Arc<MockMediaEngine>>,
    pub node_ids: Vec<NodeId>,
    pub signaling: Arc<CapturingSignalingTransport>,
    pub cdr: Arc<RecordingCdrSink>,
    pub recording: Arc<MockRecordingCoordinator>,
}

impl Default for TestControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl TestControlPlane {
    /// One connected mock node, destroy-on-empty sessions, recording on.
    pub fn new() -> Self {
        Self::with_options(ControlPlaneOptions::default())
    }

    pub fn with_options(options: ControlPlaneOptions) -> Self {
        let cluster = Arc::new(NodeCluster::new(Arc::new(SessionCountLoad::new(
            options.node_capacity,
        ))));
        let mut engines = Vec::new();
        let mut node_ids = Vec::new();
        for index in 0..options.nodes {
            let engine = Arc::new(MockMediaEngine::new());
            let id = NodeId::new(format!("kms_{}", index + 1));
            cluster.add_node(Arc::new(MediaNode::new(
                id.clone(),
                format!("mock://node-{}", index + 1),
                Arc::clone(&engine) as Arc<dyn sfu_controller::media::MediaEngine>,
            )));
            cluster.handle_connected(&id);
            engines.push(engine);
            node_ids.push(id);
        }

        let signaling = Arc::new(CapturingSignalingTransport::new());
        let cdr = Arc::new(RecordingCdrSink::new());
        let recording = Arc::new(MockRecordingCoordinator::new());
        let collaborators = Collaborators {
            token_issuer: Arc::new(DefaultTokenIssuer::new("wss://sfu.test:4443", "test")),
            recording: Arc::clone(&recording) as _,
            cdr: Arc::clone(&cdr) as _,
            signaling: Arc::clone(&signaling) as _,
        };
        let settings = ManagerSettings {
            empty_session_policy: options.empty_session_policy,
            recording_enabled: options.recording_enabled,
            endpoint_timeout: options.endpoint_timeout,
            benign_error_codes: vec![DEFAULT_BENIGN_ERROR_CODE],
        };
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&cluster),
            collaborators,
            settings,
        ));

        Self {
            manager,
            cluster,
            engines,
            node_ids,
            signaling,
            cdr,
            recording,
        }
    }

    /// The first mock node's engine.
    pub fn engine(&self) -> &Arc<MockMediaEngine> {
        self.engines.first().expect("control plane has no nodes")
    }

    /// Create a ROUTED session with default properties.
    pub fn create_session(&self) -> SessionId {
        self.manager
            .create_session(SessionProperties::default())
            .expect("session creation should succeed")
            .id()
            .clone()
    }

    /// Issue a token and join with it.
    pub async fn join(&self, session: &SessionId, role: Role) -> Arc<Participant> {
        let token = self
            .manager
            .issue_token(session, role, "", None)
            .expect("token issuance should succeed");
        self.manager
            .join_participant(
                session,
                JoinRequest {
                    token: common::secret::ExposeSecret::expose_secret(&token.value).to_string(),
                    client_data: String::new(),
                },
            )
            .await
            .expect("join should succeed")
    }
}
