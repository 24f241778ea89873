//! A session: its participants, streams, tokens and media pipeline.

use super::participant::Participant;
use crate::cluster::{MediaNode, NodeCluster};
use crate::collaborators::Token;
use crate::endpoint::media_endpoint::spawn_release;
use crate::endpoint::MediaBinding;
use crate::errors::SfuError;
use crate::media::ErrorClassifier;
use crate::models::{EndReason, ListResponse, SessionInfo, SessionProperties};
use common::secret::ExposeSecret;
use common::types::{ParticipantPrivateId, ParticipantPublicId, SessionId, StreamId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotActive,
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotActive => "not_active",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed,
}

/// Proof that the session was open when an operation started. Close waits
/// until every admission is dropped.
pub struct Admission<'a> {
    _guard: RwLockReadGuard<'a, Lifecycle>,
}

pub struct RoomSession {
    id: SessionId,
    created_at_ms: i64,
    properties: SessionProperties,
    cluster: Arc<NodeCluster>,
    classifier: ErrorClassifier,
    lifecycle: RwLock<Lifecycle>,
    closed: AtomicBool,
    active: AtomicBool,
    pipeline: parking_lot::RwLock<Option<MediaBinding>>,
    pipeline_lock: Mutex<()>,
    participants: DashMap<ParticipantPrivateId, Arc<Participant>>,
    streams: DashMap<StreamId, ParticipantPrivateId>,
    tokens: DashMap<String, Token>,
    active_publishers: AtomicUsize,
}

impl RoomSession {
    pub fn new(
        id: SessionId,
        properties: SessionProperties,
        cluster: Arc<NodeCluster>,
        classifier: ErrorClassifier,
    ) -> Self {
        Self {
            id,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            properties,
            cluster,
            classifier,
            lifecycle: RwLock::new(Lifecycle::Open),
            closed: AtomicBool::new(false),
            active: AtomicBool::new(false),
            pipeline: parking_lot::RwLock::new(None),
            pipeline_lock: Mutex::new(()),
            participants: DashMap::new(),
            streams: DashMap::new(),
            tokens: DashMap::new(),
            active_publishers: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn properties(&self) -> &SessionProperties {
        &self.properties
    }

    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else if self.active.load(Ordering::SeqCst) {
            SessionState::Active
        } else {
            SessionState::NotActive
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Enter the session for an operation that must not overlap close.
    ///
    /// Never waits: if close has started or finished this fails at once.
    ///
    /// # Errors
    ///
    /// `SessionClosing` if the session is closing or closed.
    pub fn try_admit(&self) -> Result<Admission<'_>, SfuError> {
        let guard = self
            .lifecycle
            .try_read()
            .map_err(|_| SfuError::SessionClosing(self.id.to_string()))?;
        if *guard == Lifecycle::Closed {
            return Err(SfuError::SessionClosing(self.id.to_string()));
        }
        Ok(Admission { _guard: guard })
    }

    pub(crate) fn mark_active(&self) -> bool {
        !self.active.swap(true, Ordering::SeqCst)
    }

    /// Close the session, tearing down every participant and the pipeline.
    ///
    /// Waits for admitted operations to finish. Returns `false` if the
    /// session was already closed.
    pub async fn close(&self, reason: EndReason) -> bool {
        let lifecycle = self.lifecycle.write().await;
        self.close_locked(lifecycle, reason).await
    }

    /// Close the session only if nobody joined while admitted operations
    /// were draining. Returns `false` if it was left open or already closed.
    pub(crate) async fn close_if_empty(&self, reason: EndReason) -> bool {
        let lifecycle = self.lifecycle.write().await;
        if !self.participants.is_empty() {
            debug!(target: "sfu.session", session_id = %self.id, "Participant joined before empty session could close");
            return false;
        }
        self.close_locked(lifecycle, reason).await
    }

    #[instrument(skip_all, name = "sfu.session.close", fields(session_id = %self.id, reason = reason.as_str()))]
    async fn close_locked(
        &self,
        mut lifecycle: RwLockWriteGuard<'_, Lifecycle>,
        reason: EndReason,
    ) -> bool {
        if *lifecycle == Lifecycle::Closed {
            debug!(target: "sfu.session", "Session already closed");
            return false;
        }
        *lifecycle = Lifecycle::Closed;
        self.closed.store(true, Ordering::SeqCst);

        let participants = self.participants();
        for participant in &participants {
            participant.orchestrator().close(self, reason).await;
        }
        self.participants.clear();
        self.streams.clear();
        self.tokens.clear();
        self.release_pipeline();
        self.active.store(false, Ordering::SeqCst);

        info!(
            target: "sfu.session",
            participants = participants.len(),
            "Session closed"
        );
        true
    }

    /// Return an empty session to not-active, giving its node back.
    ///
    /// Runs once admitted joins have finished and only if the session is
    /// still empty and open; `on_recycled` runs before admission reopens.
    /// Returns whether the session was recycled.
    pub(crate) async fn recycle_if_empty<F: FnOnce()>(&self, on_recycled: F) -> bool {
        let lifecycle = self.lifecycle.write().await;
        if *lifecycle == Lifecycle::Closed || !self.participants.is_empty() {
            return false;
        }
        self.release_pipeline();
        self.active.store(false, Ordering::SeqCst);
        self.active_publishers.store(0, Ordering::SeqCst);
        on_recycled();
        drop(lifecycle);
        info!(target: "sfu.session", session_id = %self.id, "Session recycled");
        true
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    pub fn pipeline(&self) -> Option<MediaBinding> {
        self.pipeline.read().clone()
    }

    pub fn node(&self) -> Option<Arc<MediaNode>> {
        self.pipeline.read().as_ref().map(|p| Arc::clone(&p.node))
    }

    /// Pipeline on the session's node, building it on first use and again
    /// after the node was replaced by a new server instance.
    ///
    /// # Errors
    ///
    /// `NoAvailableNode` if no node can host the session,
    /// `EndpointCreation` if the node cannot build the pipeline.
    pub async fn ensure_pipeline(&self) -> Result<MediaBinding, SfuError> {
        if let Some(pipeline) = self.pipeline().filter(MediaBinding::is_current) {
            return Ok(pipeline);
        }

        let _guard = self.pipeline_lock.lock().await;
        let existing = self.pipeline();
        if let Some(pipeline) = existing.as_ref().filter(|p| p.is_current()) {
            return Ok(pipeline.clone());
        }

        let node = match &existing {
            Some(stale) => {
                info!(target: "sfu.session", session_id = %self.id, node_id = %stale.node.id(), "Rebuilding pipeline on replaced media server instance");
                Arc::clone(&stale.node)
            }
            None => self.cluster.select_and_reserve(&self.id).await?,
        };

        let epoch = node.epoch();
        match node.engine().create_pipeline().await {
            Ok(pipeline) => {
                let binding = MediaBinding {
                    node,
                    epoch,
                    pipeline: pipeline.clone(),
                    element: pipeline,
                };
                *self.pipeline.write() = Some(binding.clone());
                debug!(target: "sfu.session", session_id = %self.id, pipeline = %binding.pipeline, "Pipeline ready");
                Ok(binding)
            }
            Err(e) => {
                if existing.is_none() {
                    self.cluster.release_session(node.id(), &self.id);
                }
                warn!(target: "sfu.session", session_id = %self.id, node_id = %node.id(), error = %e, "Failed to create pipeline");
                Err(SfuError::EndpointCreation(e.to_string()))
            }
        }
    }

    fn release_pipeline(&self) {
        let Some(pipeline) = self.pipeline.write().take() else {
            return;
        };
        self.cluster.release_session(pipeline.node.id(), &self.id);
        if pipeline.is_current() {
            spawn_release(
                Arc::clone(pipeline.engine()),
                pipeline.pipeline,
                self.classifier.clone(),
            );
        }
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    /// Returns `false` if a participant with the same private id exists.
    pub(crate) fn add_participant(&self, participant: Arc<Participant>) -> bool {
        match self.participants.entry(participant.private_id().clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(participant);
                true
            }
        }
    }

    pub(crate) fn remove_participant(&self, id: &ParticipantPrivateId) -> Option<Arc<Participant>> {
        self.participants.remove(id).map(|(_, p)| p)
    }

    pub fn participant(&self, id: &ParticipantPrivateId) -> Option<Arc<Participant>> {
        self.participants.get(id).map(|p| Arc::clone(p.value()))
    }

    pub fn participant_by_public_id(&self, id: &ParticipantPublicId) -> Option<Arc<Participant>> {
        self.participants
            .iter()
            .find(|p| p.public_id() == id)
            .map(|p| Arc::clone(p.value()))
    }

    /// Participants ordered by join time.
    pub fn participants(&self) -> Vec<Arc<Participant>> {
        let mut participants: Vec<Arc<Participant>> =
            self.participants.iter().map(|p| Arc::clone(p.value())).collect();
        participants.sort_by_key(|p| (p.created_at_ms(), p.public_id().clone()));
        participants
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn private_ids(&self) -> Vec<ParticipantPrivateId> {
        self.participants.iter().map(|p| p.key().clone()).collect()
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Insert-if-absent. Returns `true` if the stream was newly registered.
    pub fn register_stream(&self, stream: &StreamId, owner: &ParticipantPrivateId) -> bool {
        match self.streams.entry(stream.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(owner.clone());
                true
            }
        }
    }

    pub fn unregister_stream(&self, stream: &StreamId) -> Option<ParticipantPrivateId> {
        self.streams.remove(stream).map(|(_, owner)| owner)
    }

    pub fn stream_owner(&self, stream: &StreamId) -> Option<ParticipantPrivateId> {
        self.streams.get(stream).map(|o| o.value().clone())
    }

    pub fn has_stream(&self, stream: &StreamId) -> bool {
        self.streams.contains_key(stream)
    }

    pub fn register_publisher(&self) {
        self.active_publishers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn deregister_publisher(&self) {
        // Saturate at zero; a recycle may have reset the count already.
        let _ = self
            .active_publishers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn active_publishers(&self) -> usize {
        self.active_publishers.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    pub(crate) fn add_token(&self, token: Token) {
        self.tokens
            .insert(token.value.expose_secret().to_string(), token);
    }

    /// Remove and return the token with this value.
    pub(crate) fn consume_token(&self, value: &str) -> Option<Token> {
        self.tokens.remove(value).map(|(_, t)| t)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn to_info(&self, recording: bool) -> SessionInfo {
        let p = &self.properties;
        SessionInfo {
            session_id: self.id.to_string(),
            created_at: self.created_at_ms,
            media_mode: p.media_mode,
            recording_mode: p.recording_mode,
            default_output_mode: p.default_output_mode,
            default_recording_layout: p.default_recording_layout,
            default_custom_layout: p.default_custom_layout.clone(),
            custom_session_id: p.custom_session_id.clone(),
            recording,
            connections: ListResponse::new(
                self.participants().iter().map(|p| p.to_info()).collect(),
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::SessionCountLoad;
    use crate::media::mock::{ElementKind, MockMediaEngine};
    use crate::media::ReconnectOutcome;
    use common::types::NodeId;
    use std::time::Duration;

    fn cluster_with_node(engine: Arc<MockMediaEngine>) -> Arc<NodeCluster> {
        let cluster = Arc::new(NodeCluster::new(Arc::new(SessionCountLoad::new(10))));
        let node = Arc::new(MediaNode::new(NodeId::new("kms_A"), "ws://a", engine));
        cluster.add_node(node);
        cluster.handle_connected(&NodeId::new("kms_A"));
        cluster
    }

    fn session(cluster: Arc<NodeCluster>) -> RoomSession {
        RoomSession::new(
            SessionId::new("ses_A"),
            SessionProperties::default(),
            cluster,
            ErrorClassifier::default(),
        )
    }

    #[tokio::test]
    async fn test_admission_blocks_close_until_dropped() {
        let engine = Arc::new(MockMediaEngine::new());
        let room = Arc::new(session(cluster_with_node(engine)));

        let admission = room.try_admit().unwrap();
        let closer = {
            let room = Arc::clone(&room);
            tokio::spawn(async move { room.close(EndReason::SessionClosedByServer).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Close is waiting on the admitted operation; new admissions fail.
        assert!(!room.is_closed());
        assert!(matches!(room.try_admit(), Err(SfuError::SessionClosing(_))));

        drop(admission);
        assert!(closer.await.unwrap());
        assert_eq!(room.state(), SessionState::Closed);
        assert!(matches!(room.try_admit(), Err(SfuError::SessionClosing(_))));
    }

    #[tokio::test]
    async fn test_close_twice_returns_false() {
        let engine = Arc::new(MockMediaEngine::new());
        let room = session(cluster_with_node(engine));
        assert!(room.close(EndReason::SessionClosedByServer).await);
        assert!(!room.close(EndReason::SessionClosedByServer).await);
    }

    #[tokio::test]
    async fn test_pipeline_built_once_and_rebuilt_after_instance_change() {
        let engine = Arc::new(MockMediaEngine::new());
        let cluster = cluster_with_node(engine.clone());
        let room = session(cluster.clone());

        let first = room.ensure_pipeline().await.unwrap();
        let again = room.ensure_pipeline().await.unwrap();
        assert_eq!(first.pipeline, again.pipeline);
        assert_eq!(engine.created_count(ElementKind::Pipeline), 1);
        assert_eq!(first.node.session_count(), 1);

        engine.set_reconnect_outcome(ReconnectOutcome::NewInstance);
        let outcome = first.node.engine().reconnect().await.unwrap();
        cluster.handle_reconnected(&NodeId::new("kms_A"), outcome);

        let rebuilt = room.ensure_pipeline().await.unwrap();
        assert_ne!(rebuilt.pipeline, first.pipeline);
        assert!(rebuilt.is_current());
        assert_eq!(engine.created_count(ElementKind::Pipeline), 2);
        assert_eq!(rebuilt.node.session_count(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_failure_unbinds_node() {
        let engine = Arc::new(MockMediaEngine::new());
        let cluster = cluster_with_node(engine.clone());
        let room = session(cluster.clone());
        engine.set_reachable(false);

        let result = room.ensure_pipeline().await;
        assert!(matches!(result, Err(SfuError::EndpointCreation(_))));
        assert_eq!(cluster.node(&NodeId::new("kms_A")).unwrap().session_count(), 0);
    }

    #[tokio::test]
    async fn test_no_node_available() {
        let cluster = Arc::new(NodeCluster::new(Arc::new(SessionCountLoad::new(10))));
        let room = session(cluster);
        assert!(matches!(
            room.ensure_pipeline().await,
            Err(SfuError::NoAvailableNode)
        ));
    }

    #[tokio::test]
    async fn test_recycle_releases_pipeline() {
        let engine = Arc::new(MockMediaEngine::new());
        let cluster = cluster_with_node(engine.clone());
        let room = session(cluster);
        let pipeline = room.ensure_pipeline().await.unwrap();
        room.mark_active();

        let mut moved = false;
        assert!(room.recycle_if_empty(|| moved = true).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(moved);
        assert_eq!(room.state(), SessionState::NotActive);
        assert!(room.pipeline().is_none());
        assert!(engine.is_released(&pipeline.pipeline));
        assert_eq!(pipeline.node.session_count(), 0);
        assert!(room.try_admit().is_ok());
    }

    #[tokio::test]
    async fn test_recycle_waits_for_admitted_operations() {
        let engine = Arc::new(MockMediaEngine::new());
        let room = Arc::new(session(cluster_with_node(engine)));
        room.ensure_pipeline().await.unwrap();
        room.mark_active();

        let admission = room.try_admit().unwrap();
        let recycler = {
            let room = Arc::clone(&room);
            tokio::spawn(async move { room.recycle_if_empty(|| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(room.state(), SessionState::Active);
        assert!(room.pipeline().is_some());

        drop(admission);
        assert!(recycler.await.unwrap());
        assert_eq!(room.state(), SessionState::NotActive);
    }

    #[tokio::test]
    async fn test_closed_session_is_not_recycled() {
        let engine = Arc::new(MockMediaEngine::new());
        let room = session(cluster_with_node(engine));
        assert!(room.close(EndReason::SessionClosedByServer).await);
        assert!(!room.recycle_if_empty(|| {}).await);
        assert!(!room.close_if_empty(EndReason::LastParticipantLeft).await);
        assert_eq!(room.state(), SessionState::Closed);
    }

    #[test]
    fn test_stream_registry_insert_if_absent() {
        let cluster = Arc::new(NodeCluster::new(Arc::new(SessionCountLoad::new(10))));
        let room = session(cluster);
        let stream = StreamId::new("str_CAM_Abcd_con_A");
        let a = ParticipantPrivateId::new("a");
        let b = ParticipantPrivateId::new("b");

        assert!(room.register_stream(&stream, &a));
        assert!(!room.register_stream(&stream, &b));
        assert_eq!(room.stream_owner(&stream), Some(a.clone()));
        assert_eq!(room.unregister_stream(&stream), Some(a));
        assert!(!room.has_stream(&stream));
    }

    #[test]
    fn test_publisher_count_saturates() {
        let cluster = Arc::new(NodeCluster::new(Arc::new(SessionCountLoad::new(10))));
        let room = session(cluster);
        room.register_publisher();
        room.deregister_publisher();
        room.deregister_publisher();
        assert_eq!(room.active_publishers(), 0);
    }
}
