//! In-memory media engine for tests.
//!
//! Tracks every element it hands out so tests can assert on creation,
//! wiring, play/stop and release. Failures, creation latency and node
//! reachability are configurable up front through the builder and at runtime
//! through setters.

use super::engine::{
    ElementId, MediaEngine, MediaEngineError, MediaEvent, PlayerOptions, ReconnectOutcome,
};
use crate::models::IceCandidate;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Error code the mock returns for operations on unknown or released elements.
pub const OBJECT_NOT_FOUND: i64 = 40101;

/// Kind of element created by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Pipeline,
    WebRtcEndpoint,
    PlayerEndpoint,
    Filter,
}

#[derive(Default)]
struct MockState {
    kinds: HashMap<ElementId, ElementKind>,
    live: HashSet<ElementId>,
    released: Vec<ElementId>,
    connections: Vec<(ElementId, ElementId)>,
    plays: HashMap<ElementId, usize>,
    stops: HashMap<ElementId, usize>,
    candidates: Vec<(ElementId, IceCandidate)>,
    watched: HashSet<ElementId>,
    offers: Vec<(ElementId, String)>,
    unreachable: bool,
    create_delay: Option<Duration>,
    pipeline_delay: Option<Duration>,
    gather_delay: Option<Duration>,
    endpoint_failure: Option<MediaEngineError>,
    offer_failure: Option<MediaEngineError>,
    connect_failure: Option<MediaEngineError>,
    reconnect_outcome: Option<ReconnectOutcome>,
}

/// Fake media engine.
pub struct MockMediaEngine {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    instance: AtomicU64,
    call_count: AtomicUsize,
    events_tx: broadcast::Sender<MediaEvent>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaEngine {
    /// Engine with no latency and no injected failures.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    // ------------------------------------------------------------------
    // Runtime configuration
    // ------------------------------------------------------------------

    /// Make every call fail with a transport error until reset.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn set_create_delay(&self, delay: Option<Duration>) {
        self.state.lock().create_delay = delay;
    }

    pub fn set_pipeline_delay(&self, delay: Option<Duration>) {
        self.state.lock().pipeline_delay = delay;
    }

    /// Latency of candidate gathering, after the endpoint was found live.
    pub fn set_gather_delay(&self, delay: Option<Duration>) {
        self.state.lock().gather_delay = delay;
    }

    pub fn fail_endpoint_creation(&self, error: Option<MediaEngineError>) {
        self.state.lock().endpoint_failure = error;
    }

    pub fn fail_process_offer(&self, error: Option<MediaEngineError>) {
        self.state.lock().offer_failure = error;
    }

    pub fn fail_connect(&self, error: Option<MediaEngineError>) {
        self.state.lock().connect_failure = error;
    }

    /// Outcome returned by the next `reconnect` calls.
    pub fn set_reconnect_outcome(&self, outcome: ReconnectOutcome) {
        self.state.lock().reconnect_outcome = Some(outcome);
    }

    /// Drop an element as if the node lost it, without recording a release.
    pub fn forget_element(&self, element: &ElementId) {
        self.state.lock().live.remove(element);
    }

    /// Publish an event to subscribers of `events()`.
    pub fn emit_event(&self, event: MediaEvent) {
        let _ = self.events_tx.send(event);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn created_count(&self, kind: ElementKind) -> usize {
        self.state
            .lock()
            .kinds
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    pub fn live_count(&self, kind: ElementKind) -> usize {
        let state = self.state.lock();
        state
            .live
            .iter()
            .filter(|id| state.kinds.get(*id) == Some(&kind))
            .count()
    }

    pub fn is_live(&self, element: &ElementId) -> bool {
        self.state.lock().live.contains(element)
    }

    pub fn is_released(&self, element: &ElementId) -> bool {
        self.state.lock().released.contains(element)
    }

    pub fn released(&self) -> Vec<ElementId> {
        self.state.lock().released.clone()
    }

    pub fn is_connected(&self, source: &ElementId, sink: &ElementId) -> bool {
        self.state
            .lock()
            .connections
            .iter()
            .any(|(s, d)| s == source && d == sink)
    }

    pub fn play_count(&self, player: &ElementId) -> usize {
        self.state.lock().plays.get(player).copied().unwrap_or(0)
    }

    pub fn stop_count(&self, player: &ElementId) -> usize {
        self.state.lock().stops.get(player).copied().unwrap_or(0)
    }

    pub fn total_plays(&self) -> usize {
        self.state.lock().plays.values().sum()
    }

    pub fn total_stops(&self) -> usize {
        self.state.lock().stops.values().sum()
    }

    pub fn candidates_for(&self, endpoint: &ElementId) -> Vec<IceCandidate> {
        self.state
            .lock()
            .candidates
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn is_watched(&self, element: &ElementId) -> bool {
        self.state.lock().watched.contains(element)
    }

    pub fn offers_processed(&self) -> usize {
        self.state.lock().offers.len()
    }

    /// Live elements of a given kind.
    pub fn live_elements(&self, kind: ElementKind) -> Vec<ElementId> {
        let state = self.state.lock();
        let mut ids: Vec<ElementId> = state
            .live
            .iter()
            .filter(|id| state.kinds.get(*id) == Some(&kind))
            .cloned()
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn enter(&self) -> Result<(), MediaEngineError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().unreachable {
            return Err(MediaEngineError::Transport(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn require_live(&self, element: &ElementId) -> Result<(), MediaEngineError> {
        if self.state.lock().live.contains(element) {
            Ok(())
        } else {
            Err(not_found(element))
        }
    }

    async fn create(
        &self,
        kind: ElementKind,
        parent: Option<&ElementId>,
    ) -> Result<ElementId, MediaEngineError> {
        self.enter()?;
        let (delay, failure) = {
            let state = self.state.lock();
            let failure = match kind {
                ElementKind::WebRtcEndpoint | ElementKind::PlayerEndpoint => {
                    state.endpoint_failure.clone()
                }
                ElementKind::Pipeline | ElementKind::Filter => None,
            };
            let delay = if kind == ElementKind::Pipeline {
                state.pipeline_delay
            } else {
                state.create_delay
            };
            (delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(parent) = parent {
            self.require_live(parent)?;
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = self.instance.load(Ordering::SeqCst);
        let prefix = match kind {
            ElementKind::Pipeline => "MediaPipeline",
            ElementKind::WebRtcEndpoint => "WebRtcEndpoint",
            ElementKind::PlayerEndpoint => "PlayerEndpoint",
            ElementKind::Filter => "Filter",
        };
        let id = ElementId::new(format!("{instance}_{prefix}_{n}"));
        let mut state = self.state.lock();
        state.kinds.insert(id.clone(), kind);
        state.live.insert(id.clone());
        Ok(id)
    }
}

fn not_found(element: &ElementId) -> MediaEngineError {
    MediaEngineError::Server {
        code: OBJECT_NOT_FOUND,
        message: format!("Object '{element}' not found"),
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_pipeline(&self) -> Result<ElementId, MediaEngineError> {
        self.create(ElementKind::Pipeline, None).await
    }

    async fn create_webrtc_endpoint(
        &self,
        pipeline: &ElementId,
    ) -> Result<ElementId, MediaEngineError> {
        self.create(ElementKind::WebRtcEndpoint, Some(pipeline))
            .await
    }

    async fn create_player_endpoint(
        &self,
        pipeline: &ElementId,
        _options: &PlayerOptions,
    ) -> Result<ElementId, MediaEngineError> {
        self.create(ElementKind::PlayerEndpoint, Some(pipeline))
            .await
    }

    async fn create_filter(
        &self,
        pipeline: &ElementId,
        _filter_type: &str,
        _options: &serde_json::Value,
    ) -> Result<ElementId, MediaEngineError> {
        self.create(ElementKind::Filter, Some(pipeline)).await
    }

    async fn process_offer(
        &self,
        endpoint: &ElementId,
        sdp_offer: &str,
    ) -> Result<String, MediaEngineError> {
        self.enter()?;
        if let Some(err) = self.state.lock().offer_failure.clone() {
            return Err(err);
        }
        self.require_live(endpoint)?;
        self.state
            .lock()
            .offers
            .push((endpoint.clone(), sdp_offer.to_string()));
        Ok(format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={endpoint}\r\nt=0 0\r\n"
        ))
    }

    async fn gather_candidates(&self, endpoint: &ElementId) -> Result<(), MediaEngineError> {
        self.enter()?;
        self.require_live(endpoint)?;
        let delay = self.state.lock().gather_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &ElementId,
        candidate: &IceCandidate,
    ) -> Result<(), MediaEngineError> {
        self.enter()?;
        self.require_live(endpoint)?;
        self.state
            .lock()
            .candidates
            .push((endpoint.clone(), candidate.clone()));
        Ok(())
    }

    async fn connect(
        &self,
        source: &ElementId,
        sink: &ElementId,
    ) -> Result<(), MediaEngineError> {
        self.enter()?;
        if let Some(err) = self.state.lock().connect_failure.clone() {
            return Err(err);
        }
        self.require_live(source)?;
        self.require_live(sink)?;
        self.state
            .lock()
            .connections
            .push((source.clone(), sink.clone()));
        Ok(())
    }

    async fn disconnect(
        &self,
        source: &ElementId,
        sink: &ElementId,
    ) -> Result<(), MediaEngineError> {
        self.enter()?;
        self.state
            .lock()
            .connections
            .retain(|(s, d)| !(s == source && d == sink));
        Ok(())
    }

    async fn play(&self, player: &ElementId) -> Result<(), MediaEngineError> {
        self.enter()?;
        self.require_live(player)?;
        *self.state.lock().plays.entry(player.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn stop(&self, player: &ElementId) -> Result<(), MediaEngineError> {
        self.enter()?;
        self.require_live(player)?;
        *self.state.lock().stops.entry(player.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn release(&self, element: &ElementId) -> Result<(), MediaEngineError> {
        self.enter()?;
        let mut state = self.state.lock();
        if !state.live.remove(element) {
            return Err(not_found(element));
        }
        state.released.push(element.clone());
        state
            .connections
            .retain(|(s, d)| s != element && d != element);
        Ok(())
    }

    async fn watch_element(&self, element: &ElementId) -> Result<(), MediaEngineError> {
        self.enter()?;
        self.require_live(element)?;
        self.state.lock().watched.insert(element.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), MediaEngineError> {
        self.enter()
    }

    async fn reconnect(&self) -> Result<ReconnectOutcome, MediaEngineError> {
        self.enter()?;
        let outcome = self
            .state
            .lock()
            .reconnect_outcome
            .unwrap_or(ReconnectOutcome::SameInstance);
        if outcome == ReconnectOutcome::NewInstance {
            self.instance.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock();
            state.live.clear();
            state.connections.clear();
            state.watched.clear();
        }
        Ok(outcome)
    }

    fn events(&self) -> broadcast::Receiver<MediaEvent> {
        self.events_tx.subscribe()
    }
}

/// Builder for `MockMediaEngine`.
#[derive(Default)]
pub struct MockMediaEngineBuilder {
    create_delay: Option<Duration>,
    endpoint_failure: Option<MediaEngineError>,
    offer_failure: Option<MediaEngineError>,
    connect_failure: Option<MediaEngineError>,
    reconnect_outcome: Option<ReconnectOutcome>,
    unreachable: bool,
}

impl MockMediaEngineBuilder {
    /// Latency applied to endpoint and filter creation.
    #[must_use]
    pub fn create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn fail_endpoint_creation(mut self, error: MediaEngineError) -> Self {
        self.endpoint_failure = Some(error);
        self
    }

    #[must_use]
    pub fn fail_process_offer(mut self, error: MediaEngineError) -> Self {
        self.offer_failure = Some(error);
        self
    }

    #[must_use]
    pub fn fail_connect(mut self, error: MediaEngineError) -> Self {
        self.connect_failure = Some(error);
        self
    }

    #[must_use]
    pub fn reconnect_outcome(mut self, outcome: ReconnectOutcome) -> Self {
        self.reconnect_outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn build(self) -> MockMediaEngine {
        let (events_tx, _) = broadcast::channel(256);
        MockMediaEngine {
            state: Mutex::new(MockState {
                unreachable: self.unreachable,
                create_delay: self.create_delay,
                endpoint_failure: self.endpoint_failure,
                offer_failure: self.offer_failure,
                connect_failure: self.connect_failure,
                reconnect_outcome: self.reconnect_outcome,
                ..MockState::default()
            }),
            next_id: AtomicU64::new(1),
            instance: AtomicU64::new(0),
            call_count: AtomicUsize::new(0),
            events_tx,
        }
    }
}
