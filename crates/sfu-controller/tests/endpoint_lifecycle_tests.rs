//! Endpoint lifecycle tests.
//!
//! Drive publish/subscribe flows through the session manager against mock
//! media nodes:
//! - Publish, subscribe and unpublish end to end
//! - Concurrent subscriber creation and subscription
//! - Publisher generations across unpublish
//! - External feed play/stop reference counting
//! - Closing sessions while operations are in flight

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::secret::ExposeSecret;
use common::types::{ParticipantPublicId, SessionId, StreamId};
use sfu_controller::collaborators::cdr::mock::RecordingCdrSink;
use sfu_controller::collaborators::recording::mock::MockRecordingCoordinator;
use sfu_controller::collaborators::signaling::mock::CapturingSignalingTransport;
use sfu_controller::collaborators::{
    Collaborators, DefaultTokenIssuer, RecordingCoordinator, Token, TokenIssuer,
};
use sfu_controller::config::EmptySessionPolicy;
use sfu_controller::errors::SfuError;
use sfu_controller::media::mock::ElementKind;
use sfu_controller::media::{MediaEngine, MediaEngineError, ReconnectOutcome};
use sfu_controller::models::{
    EndReason, ExternalFeedRequest, MediaOptions, RecordingMode, Role, SessionProperties,
    TokenOptions,
};
use sfu_controller::session::{
    JoinRequest, ManagerSettings, Participant, SessionManager, SessionState,
};
use sfu_test_utils::{ControlPlaneOptions, TestControlPlane, SDP_OFFER};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// Wait for spawned element releases to reach the mock engine.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_publish_subscribe_unpublish_scenario() {
    let tp = TestControlPlane::new();
    let manager = &tp.manager;
    let s1 = tp.create_session();

    // A joins and builds its publisher
    let a = tp.join(&s1, Role::Publisher).await;
    let stream = manager
        .create_publisher(&s1, a.private_id(), MediaOptions::default(), None)
        .await
        .unwrap();
    let parts: Vec<&str> = stream.as_str().splitn(4, '_').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts.first(), Some(&"str"));
    assert_eq!(parts.get(1), Some(&"CAM"));
    assert_eq!(parts.get(2).map(|tag| tag.len()), Some(4));
    assert_eq!(parts.get(3), Some(&a.public_id().as_str()));

    // A publishes
    let answer = manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    assert!(answer.starts_with("v=0"));
    assert!(a.is_streaming());
    let session = manager.session(&s1).unwrap();
    assert!(session.has_stream(&stream));

    // B subscribes to A
    let b = tp.join(&s1, Role::Subscriber).await;
    let answer = manager
        .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
        .await
        .unwrap();
    assert!(answer.is_some());
    assert_eq!(b.orchestrator().subscribed_streams(), vec![stream.clone()]);

    // A unpublishes
    manager.unpublish(&s1, a.private_id()).await.unwrap();
    assert!(!session.has_stream(&stream));
    assert!(!a.is_streaming());
    assert!(b.orchestrator().subscriber(a.public_id()).is_none());

    let result = manager
        .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
        .await;
    assert!(matches!(result, Err(SfuError::RemoteNotPublishing(_))));
}

#[tokio::test]
async fn test_publish_notifies_other_participants_and_emits_cdrs() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let b = tp.join(&s1, Role::Subscriber).await;

    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    tp.manager
        .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
        .await
        .unwrap();

    assert_eq!(tp.signaling.notifications("participantPublished").len(), 1);
    assert_eq!(tp.cdr.count("publisher_started"), 1);
    assert_eq!(tp.cdr.count("subscriber_started"), 1);

    tp.manager.unpublish(&s1, a.private_id()).await.unwrap();
    assert_eq!(tp.signaling.notifications("participantUnpublished").len(), 1);
    assert_eq!(tp.cdr.count("publisher_stopped"), 1);
    assert_eq!(tp.cdr.count("subscriber_stopped"), 1);
}

// ============================================================================
// Subscribers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_subscriber_returns_one_instance() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let b = tp.join(&s1, Role::Subscriber).await;
    let remote = ParticipantPublicId::new("con_Remote0001");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let b = Arc::clone(&b);
        let remote = remote.clone();
        handles.push(tokio::spawn(async move {
            b.orchestrator().get_or_create_subscriber(&remote)
        }));
    }
    let subscribers: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let first = subscribers.first().unwrap();
    assert!(subscribers.iter().all(|s| Arc::ptr_eq(s, first)));
    assert_eq!(b.orchestrator().subscriber_count(), 1);
}

#[tokio::test]
async fn test_concurrent_subscribe_builds_one_endpoint() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let b = tp.join(&s1, Role::Subscriber).await;
    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();

    let attempts = (0..5).map(|_| {
        tp.manager
            .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
    });
    let results = futures::future::join_all(attempts).await;

    let answered = results
        .iter()
        .filter(|r| matches!(r, Ok(Some(_))))
        .count();
    assert_eq!(answered, 1);
    assert!(results.iter().all(Result::is_ok));
    // A's publisher plus exactly one subscriber endpoint
    assert_eq!(tp.engine().created_count(ElementKind::WebRtcEndpoint), 2);
}

#[tokio::test]
async fn test_loopback_and_missing_publisher_are_rejected() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let b = tp.join(&s1, Role::Subscriber).await;

    let result = tp
        .manager
        .subscribe(&s1, a.private_id(), a.public_id(), SDP_OFFER)
        .await;
    assert!(matches!(result, Err(SfuError::LoopbackNotAllowed)));

    let result = a
        .orchestrator()
        .subscribe(a.orchestrator(), SDP_OFFER, false)
        .await;
    assert!(matches!(result, Err(SfuError::LoopbackNotAllowed)));

    let result = tp
        .manager
        .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
        .await;
    assert!(matches!(result, Err(SfuError::RemoteNotPublishing(_))));

    let result = tp
        .manager
        .subscribe(
            &s1,
            b.private_id(),
            &ParticipantPublicId::new("con_Nobody0001"),
            SDP_OFFER,
        )
        .await;
    assert!(matches!(result, Err(SfuError::ParticipantNotFound(_))));
}

#[tokio::test]
async fn test_subscriber_role_cannot_publish() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let b = tp.join(&s1, Role::Subscriber).await;

    let result = tp
        .manager
        .publish(&s1, b.private_id(), SDP_OFFER, false)
        .await;
    assert!(matches!(result, Err(SfuError::Forbidden(_))));
}

// ============================================================================
// Publisher generations
// ============================================================================

#[tokio::test]
async fn test_publish_unpublish_publish_replaces_endpoint() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let session = tp.manager.session(&s1).unwrap();

    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    let first = a.orchestrator().publisher().unwrap();
    let first_stream = a.orchestrator().stream_id().unwrap();
    let first_element = first.core().binding().unwrap().element;

    tp.manager.unpublish(&s1, a.private_id()).await.unwrap();
    assert!(!session.has_stream(&first_stream));
    let idle = a.orchestrator().publisher().unwrap();
    assert!(!Arc::ptr_eq(&first, &idle));
    assert!(!a.is_streaming());

    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    let second = a.orchestrator().publisher().unwrap();
    assert!(Arc::ptr_eq(&idle, &second));
    assert!(a.is_streaming());
    let second_stream = a.orchestrator().stream_id().unwrap();
    assert!(session.has_stream(&second_stream));
    assert_eq!(session.active_publishers(), 1);

    settle().await;
    assert!(tp.engine().is_released(&first_element));
    assert_ne!(second.core().binding().unwrap().element, first_element);
}

#[tokio::test]
async fn test_desired_stream_id_is_kept() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let desired = StreamId::new("str_CAM_Xabc_custom");

    let stream = tp
        .manager
        .create_publisher(&s1, a.private_id(), MediaOptions::default(), Some(desired.clone()))
        .await
        .unwrap();
    assert_eq!(stream, desired);
}

#[tokio::test]
async fn test_benign_negotiation_error_is_a_stale_race() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;

    tp.engine().fail_process_offer(Some(MediaEngineError::Server {
        code: 40101,
        message: "Object not found".to_string(),
    }));
    let result = tp
        .manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await;
    assert!(matches!(result, Err(SfuError::StaleEndpointRace)));

    tp.engine().fail_process_offer(Some(MediaEngineError::Server {
        code: 40001,
        message: "SDP parse error".to_string(),
    }));
    let result = tp
        .manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await;
    assert!(matches!(result, Err(SfuError::MediaNegotiation(_))));

    tp.engine().fail_process_offer(None);
    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    assert!(a.is_streaming());
}

#[tokio::test]
async fn test_slow_endpoint_times_out_and_slot_recovers() {
    let tp = TestControlPlane::with_options(ControlPlaneOptions {
        endpoint_timeout: Duration::from_millis(100),
        ..ControlPlaneOptions::default()
    });
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;

    tp.engine().set_create_delay(Some(Duration::from_millis(400)));
    let result = tp
        .manager
        .create_publisher(&s1, a.private_id(), MediaOptions::default(), None)
        .await;
    assert!(matches!(result, Err(SfuError::EndpointTimeout(_))));

    tp.engine().set_create_delay(None);
    tp.manager
        .create_publisher(&s1, a.private_id(), MediaOptions::default(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_endpoint_creation_failure_is_reported() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;

    tp.engine()
        .fail_endpoint_creation(Some(MediaEngineError::Transport("reset".to_string())));
    let result = tp
        .manager
        .create_publisher(&s1, a.private_id(), MediaOptions::default(), None)
        .await;
    assert!(matches!(result, Err(SfuError::EndpointCreation(_))));
}

// ============================================================================
// External feeds
// ============================================================================

fn feed_request() -> ExternalFeedRequest {
    ExternalFeedRequest {
        rtsp_uri: Some("rtsp://camera.local:554/live".to_string()),
        ..ExternalFeedRequest::default()
    }
}

#[tokio::test]
async fn test_external_feed_stops_when_last_subscriber_leaves() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let info = tp
        .manager
        .publish_external_feed(&s1, feed_request())
        .await
        .unwrap();
    let feed = ParticipantPublicId::new(info.connection_id);
    assert_eq!(info.kind, "IPCAM");
    assert_eq!(tp.engine().total_plays(), 0);

    let mut viewers = Vec::new();
    for _ in 0..3 {
        let viewer = tp.join(&s1, Role::Subscriber).await;
        tp.manager
            .subscribe(&s1, viewer.private_id(), &feed, SDP_OFFER)
            .await
            .unwrap();
        viewers.push(viewer);
    }
    assert_eq!(tp.engine().total_plays(), 1);

    for (index, viewer) in viewers.iter().enumerate() {
        assert!(tp
            .manager
            .cancel_subscription(&s1, viewer.private_id(), &feed)
            .await
            .unwrap());
        let expected_stops = usize::from(index == viewers.len() - 1);
        assert_eq!(tp.engine().total_stops(), expected_stops);
    }
}

#[tokio::test]
async fn test_external_feed_keeps_playing_when_a_viewer_arrives_in_time() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let info = tp
        .manager
        .publish_external_feed(&s1, feed_request())
        .await
        .unwrap();
    let feed = ParticipantPublicId::new(info.connection_id);

    let mut viewers = Vec::new();
    for _ in 0..3 {
        let viewer = tp.join(&s1, Role::Subscriber).await;
        tp.manager
            .subscribe(&s1, viewer.private_id(), &feed, SDP_OFFER)
            .await
            .unwrap();
        viewers.push(viewer);
    }
    let [first, second, third] = viewers.as_slice() else {
        unreachable!("three viewers joined");
    };

    for viewer in [first, second] {
        tp.manager
            .cancel_subscription(&s1, viewer.private_id(), &feed)
            .await
            .unwrap();
    }
    let fourth = tp.join(&s1, Role::Subscriber).await;
    tp.manager
        .subscribe(&s1, fourth.private_id(), &feed, SDP_OFFER)
        .await
        .unwrap();

    tp.manager
        .cancel_subscription(&s1, third.private_id(), &feed)
        .await
        .unwrap();
    assert_eq!(tp.engine().total_stops(), 0);
    assert_eq!(tp.engine().total_plays(), 1);

    tp.manager
        .cancel_subscription(&s1, fourth.private_id(), &feed)
        .await
        .unwrap();
    assert_eq!(tp.engine().total_stops(), 1);
}

#[tokio::test]
async fn test_subscription_cancelled_while_negotiating_leaves_feed_stopped() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let info = tp
        .manager
        .publish_external_feed(&s1, feed_request())
        .await
        .unwrap();
    let feed = ParticipantPublicId::new(info.connection_id);
    let viewer = tp.join(&s1, Role::Subscriber).await;
    tp.engine().set_gather_delay(Some(Duration::from_millis(100)));

    let subscribing = {
        let manager = Arc::clone(&tp.manager);
        let s1 = s1.clone();
        let viewer = viewer.private_id().clone();
        let feed = feed.clone();
        tokio::spawn(async move { manager.subscribe(&s1, &viewer, &feed, SDP_OFFER).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(tp
        .manager
        .cancel_subscription(&s1, viewer.private_id(), &feed)
        .await
        .unwrap());

    // The cancelled subscription yields no answer and holds no feed count
    assert!(subscribing.await.unwrap().unwrap().is_none());
    assert!(viewer.orchestrator().subscriber(&feed).is_none());
    assert_eq!(tp.cdr.count("subscriber_started"), 0);
    let publisher = tp
        .manager
        .session(&s1)
        .unwrap()
        .participant_by_public_id(&feed)
        .unwrap()
        .orchestrator()
        .publisher()
        .unwrap();
    assert_eq!(publisher.feed_subscriber_count().await, 0);
    assert_eq!(tp.engine().total_plays(), 0);

    // A later viewer starts the feed and its departure stops it again
    tp.engine().set_gather_delay(None);
    tp.manager
        .subscribe(&s1, viewer.private_id(), &feed, SDP_OFFER)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tp.engine().total_plays(), 1);
    tp.manager
        .cancel_subscription(&s1, viewer.private_id(), &feed)
        .await
        .unwrap();
    assert_eq!(tp.engine().total_stops(), 1);
    assert_eq!(publisher.feed_subscriber_count().await, 0);
}

#[tokio::test]
async fn test_external_feed_cannot_be_force_unpublished() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    tp.manager
        .publish_external_feed(&s1, feed_request())
        .await
        .unwrap();
    let session = tp.manager.session(&s1).unwrap();
    let feed = session.participants().into_iter().next().unwrap();
    let stream = feed.orchestrator().stream_id().unwrap();
    assert!(stream.as_str().starts_with("str_IPC_"));

    let result = tp.manager.unpublish_stream(&s1, &stream).await;
    assert!(matches!(result, Err(SfuError::NotAllowed(_))));
}

#[tokio::test]
async fn test_external_feed_requires_valid_uri() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();

    let result = tp
        .manager
        .publish_external_feed(&s1, ExternalFeedRequest::default())
        .await;
    assert!(matches!(result, Err(SfuError::BadRequest(_))));

    let result = tp
        .manager
        .publish_external_feed(
            &s1,
            ExternalFeedRequest {
                rtsp_uri: Some("not a uri".to_string()),
                ..ExternalFeedRequest::default()
            },
        )
        .await;
    assert!(matches!(result, Err(SfuError::BadRequest(_))));
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Blocks every issuance until the test releases it.
struct GatedTokenIssuer {
    inner: DefaultTokenIssuer,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl TokenIssuer for GatedTokenIssuer {
    fn issue(
        &self,
        session: &SessionId,
        role: Role,
        server_data: &str,
        options: Option<TokenOptions>,
    ) -> Token {
        self.entered.lock().unwrap().send(()).unwrap();
        self.release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        self.inner.issue(session, role, server_data, options)
    }
}

#[tokio::test]
async fn test_token_issuance_across_close() {
    let tp = TestControlPlane::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&tp.cluster),
        Collaborators {
            token_issuer: Arc::new(GatedTokenIssuer {
                inner: DefaultTokenIssuer::new("wss://sfu.test:4443", "test"),
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            recording: Arc::new(MockRecordingCoordinator::new()),
            cdr: Arc::new(RecordingCdrSink::new()),
            signaling: Arc::new(CapturingSignalingTransport::new()),
        },
        ManagerSettings {
            empty_session_policy: EmptySessionPolicy::Destroy,
            recording_enabled: false,
            endpoint_timeout: Duration::from_secs(2),
            benign_error_codes: vec![40101],
        },
    ));
    let s1 = manager
        .create_session(SessionProperties::default())
        .unwrap()
        .id()
        .clone();

    // Admitted before close began, still inside the issuer
    let in_flight = {
        let manager = Arc::clone(&manager);
        let s1 = s1.clone();
        tokio::task::spawn_blocking(move || manager.issue_token(&s1, Role::Publisher, "", None))
    };
    entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let closer = {
        let manager = Arc::clone(&manager);
        let s1 = s1.clone();
        tokio::spawn(async move {
            manager
                .close_session(&s1, EndReason::SessionClosedByServer)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Started after close began
    let late = manager.issue_token(&s1, Role::Publisher, "", None);
    assert!(matches!(late, Err(SfuError::SessionClosing(_))));
    assert!(!closer.is_finished());

    release_tx.send(()).unwrap();
    let token = in_flight.await.unwrap().unwrap();
    assert!(token
        .value
        .expose_secret()
        .contains(&format!("sessionId={s1}")));
    closer.await.unwrap().unwrap();

    let result = manager.issue_token(&s1, Role::Publisher, "", None);
    assert!(matches!(result, Err(SfuError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_closing_endpoints_twice_releases_once() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    let session = tp.manager.session(&s1).unwrap();

    a.orchestrator().close(&session, EndReason::Disconnect).await;
    settle().await;
    assert!(a.orchestrator().is_closed());
    assert!(a.orchestrator().publisher().is_none());
    assert_eq!(tp.engine().live_count(ElementKind::WebRtcEndpoint), 0);
    let released = tp.engine().released().len();

    a.orchestrator().close(&session, EndReason::Disconnect).await;
    settle().await;
    assert_eq!(tp.engine().released().len(), released);
    assert_eq!(tp.cdr.count("publisher_stopped"), 1);
}

#[tokio::test]
async fn test_close_releases_every_element() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let b = tp.join(&s1, Role::Subscriber).await;
    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    tp.manager
        .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
        .await
        .unwrap();

    tp.manager
        .close_session(&s1, EndReason::SessionClosedByServer)
        .await
        .unwrap();
    settle().await;

    assert_eq!(tp.engine().live_count(ElementKind::WebRtcEndpoint), 0);
    assert_eq!(tp.engine().live_count(ElementKind::Pipeline), 0);
    assert_eq!(tp.signaling.notifications("sessionClosed").len(), 1);
    assert_eq!(tp.cluster.nodes().first().unwrap().session_count(), 0);

    let again = tp
        .manager
        .close_session(&s1, EndReason::SessionClosedByServer)
        .await;
    assert!(matches!(again, Err(SfuError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_last_participant_leaving_destroys_session() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;

    tp.manager
        .leave_participant(&s1, a.private_id(), EndReason::Disconnect)
        .await
        .unwrap();

    assert!(matches!(
        tp.manager.session(&s1),
        Err(SfuError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_last_participant_leaving_recycles_session() {
    let tp = TestControlPlane::with_options(ControlPlaneOptions {
        empty_session_policy: sfu_controller::config::EmptySessionPolicy::Recycle,
        ..ControlPlaneOptions::default()
    });
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    assert!(tp.manager.registry().is_active(&s1));

    tp.manager
        .leave_participant(&s1, a.private_id(), EndReason::Disconnect)
        .await
        .unwrap();

    let session = tp.manager.session(&s1).unwrap();
    assert!(!tp.manager.registry().is_active(&s1));
    assert!(session.pipeline().is_none());

    // The session can be joined again
    tp.join(&s1, Role::Publisher).await;
    assert!(tp.manager.registry().is_active(&s1));
}

/// Start a second join whose pipeline rebuild is slow, then let the only
/// participant leave while that join is still admitted.
async fn join_racing_last_leave(
    policy: EmptySessionPolicy,
) -> (TestControlPlane, SessionId, Arc<Participant>) {
    let tp = TestControlPlane::with_options(ControlPlaneOptions {
        empty_session_policy: policy,
        ..ControlPlaneOptions::default()
    });
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let token = tp
        .manager
        .issue_token(&s1, Role::Publisher, "", None)
        .unwrap();

    // The node returns as a new instance, so the next join rebuilds the pipeline
    let node_id = tp.node_ids.first().unwrap().clone();
    tp.cluster.handle_disconnected(&node_id);
    tp.engine().set_reconnect_outcome(ReconnectOutcome::NewInstance);
    let outcome = tp.engine().reconnect().await.unwrap();
    tp.cluster.handle_reconnected(&node_id, outcome);
    tp.engine().set_pipeline_delay(Some(Duration::from_millis(100)));

    let joining = {
        let manager = Arc::clone(&tp.manager);
        let s1 = s1.clone();
        let token = token.value.expose_secret().to_string();
        tokio::spawn(async move {
            manager
                .join_participant(
                    &s1,
                    JoinRequest {
                        token,
                        client_data: String::new(),
                    },
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let leaving = {
        let manager = Arc::clone(&tp.manager);
        let s1 = s1.clone();
        let a = a.private_id().clone();
        tokio::spawn(async move {
            manager
                .leave_participant(&s1, &a, EndReason::Disconnect)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The empty check waits for the admitted join
    let session = tp.manager.session(&s1).unwrap();
    assert!(tp.manager.registry().is_active(&s1));
    assert!(!session.is_closed());

    let b = joining.await.unwrap().unwrap();
    leaving.await.unwrap().unwrap();
    (tp, s1, b)
}

#[tokio::test]
async fn test_join_racing_last_leave_is_not_recycled() {
    let (tp, s1, b) = join_racing_last_leave(EmptySessionPolicy::Recycle).await;

    let session = tp.manager.session(&s1).unwrap();
    assert!(tp.manager.registry().is_active(&s1));
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.participant_count(), 1);
    assert!(session.participant(b.private_id()).is_some());
    assert!(session.pipeline().is_some_and(|p| p.is_current()));

    tp.manager
        .publish(&s1, b.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    assert_eq!(session.active_publishers(), 1);
}

#[tokio::test]
async fn test_join_racing_last_leave_is_not_destroyed() {
    let (tp, s1, b) = join_racing_last_leave(EmptySessionPolicy::Destroy).await;

    let session = tp.manager.session(&s1).unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(!b.orchestrator().is_closed());
    assert!(session.participant(b.private_id()).is_some());
    assert!(tp.signaling.notifications("sessionClosed").is_empty());
}

#[tokio::test]
async fn test_evicted_publisher_cancels_remote_subscriptions() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    let a = tp.join(&s1, Role::Publisher).await;
    let b = tp.join(&s1, Role::Subscriber).await;
    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    tp.manager
        .subscribe(&s1, b.private_id(), a.public_id(), SDP_OFFER)
        .await
        .unwrap();

    tp.manager.evict_participant(&s1, a.public_id()).await.unwrap();

    assert!(b.orchestrator().subscriber(a.public_id()).is_none());
    assert!(a.orchestrator().is_closed());
    assert_eq!(tp.signaling.notifications("participantEvicted").len(), 1);
    assert!(tp.manager.session(&s1).is_ok());
}

#[tokio::test]
async fn test_join_with_unknown_token_is_rejected() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();

    let result = tp
        .manager
        .join_participant(
            &s1,
            sfu_controller::session::JoinRequest {
                token: "wss://sfu.test:4443?token=tok_Forged".to_string(),
                client_data: String::new(),
            },
        )
        .await;
    assert!(matches!(result, Err(SfuError::InvalidToken(_))));
}

// ============================================================================
// Recording
// ============================================================================

#[tokio::test]
async fn test_always_recorded_session_starts_on_first_publish() {
    let tp = TestControlPlane::new();
    let s1 = tp
        .manager
        .create_session(SessionProperties {
            recording_mode: RecordingMode::Always,
            ..SessionProperties::default()
        })
        .unwrap()
        .id()
        .clone();
    let a = tp.join(&s1, Role::Publisher).await;
    assert!(!tp.recording.session_is_being_recorded(&s1));

    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    assert!(tp.recording.session_is_being_recorded(&s1));

    tp.manager
        .close_session(&s1, EndReason::SessionClosedByServer)
        .await
        .unwrap();
    assert!(!tp.recording.session_is_being_recorded(&s1));
}

#[tokio::test]
async fn test_streams_of_recorded_session_are_recorded_individually() {
    let tp = TestControlPlane::new();
    let s1 = tp.create_session();
    tp.recording.mark_recording(&s1);
    let a = tp.join(&s1, Role::Publisher).await;

    tp.manager
        .publish(&s1, a.private_id(), SDP_OFFER, false)
        .await
        .unwrap();
    let stream = a.orchestrator().stream_id().unwrap();
    assert_eq!(
        tp.recording.individual_recordings(),
        vec![(s1.clone(), stream.clone())]
    );

    tp.manager.unpublish(&s1, a.private_id()).await.unwrap();
    assert_eq!(tp.recording.stopped_streams(), vec![(stream, None)]);
}
