//! State shared by publisher and subscriber endpoints.

use super::readiness::{Readiness, ReadinessError, ReadyState};
use super::{EndpointContext, MediaBinding};
use crate::errors::SfuError;
use crate::media::{ElementId, ErrorClassifier, MediaEngine, MediaEngineError, MediaEventKind};
use crate::models::IceCandidate;
use crate::observability::metrics;
use common::types::{ParticipantPrivateId, SessionId};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Default)]
struct EndpointState {
    queued_candidates: Vec<IceCandidate>,
    released: bool,
}

/// One media element plus its readiness signal, queued ICE candidates and
/// event listener.
pub struct MediaEndpoint {
    /// Name the client uses for this endpoint in ICE exchanges.
    name: String,
    kind: &'static str,
    session_id: SessionId,
    owner: ParticipantPrivateId,
    readiness: Readiness<MediaBinding>,
    creation_started: AtomicBool,
    state: Mutex<EndpointState>,
    listener: CancellationToken,
    created_at_ms: i64,
}

impl MediaEndpoint {
    pub fn new(
        name: impl Into<String>,
        kind: &'static str,
        session_id: SessionId,
        owner: ParticipantPrivateId,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            session_id,
            owner,
            readiness: Readiness::new(),
            creation_started: AtomicBool::new(false),
            state: Mutex::new(EndpointState::default()),
            listener: CancellationToken::new(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn binding(&self) -> Option<MediaBinding> {
        self.readiness.ready()
    }

    pub fn state(&self) -> ReadyState<MediaBinding> {
        self.readiness.peek()
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn is_creation_started(&self) -> bool {
        self.creation_started.load(Ordering::SeqCst)
    }

    /// Returns `true` for exactly one caller: the one that must build the
    /// element.
    pub fn try_claim_creation(&self) -> bool {
        !self.creation_started.swap(true, Ordering::SeqCst)
    }

    /// Resolve the readiness signal as failed without building anything.
    pub(crate) fn abort_creation(&self, reason: &str) {
        self.readiness.fail(reason);
    }

    /// Run `build` in its own task and resolve readiness with its outcome.
    ///
    /// The build keeps running when every waiter has timed out; an element
    /// that arrives after the endpoint was released is released in turn.
    pub(crate) fn spawn_construction<F>(self: &Arc<Self>, ctx: Arc<EndpointContext>, build: F)
    where
        F: Future<Output = Result<MediaBinding, MediaEngineError>> + Send + 'static,
    {
        let endpoint = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            match build.await {
                Ok(binding) => {
                    let outcome = if endpoint.complete(binding, &ctx) {
                        "success"
                    } else {
                        "late"
                    };
                    metrics::record_endpoint_creation(endpoint.kind, outcome, started.elapsed());
                }
                Err(e) => {
                    metrics::record_endpoint_creation(endpoint.kind, "error", started.elapsed());
                    warn!(
                        target: "sfu.endpoint",
                        session_id = %endpoint.session_id,
                        endpoint = %endpoint.name,
                        kind = endpoint.kind,
                        error = %e,
                        "Endpoint construction failed"
                    );
                    endpoint.readiness.fail(e.to_string());
                }
            }
        });
    }

    /// Publish a built element. Returns `false` if the endpoint was released
    /// while the element was being built.
    fn complete(&self, binding: MediaBinding, ctx: &Arc<EndpointContext>) -> bool {
        let queued = {
            let mut state = self.state.lock();
            if state.released || !self.readiness.complete(binding.clone()) {
                drop(state);
                debug!(
                    target: "sfu.endpoint",
                    endpoint = %self.name,
                    element = %binding.element,
                    "Releasing element built after its endpoint went away"
                );
                spawn_release(
                    Arc::clone(binding.engine()),
                    binding.element,
                    ctx.classifier.clone(),
                );
                return false;
            }
            std::mem::take(&mut state.queued_candidates)
        };

        self.start_listener(&binding, ctx);

        if !queued.is_empty() {
            let engine = Arc::clone(binding.engine());
            let element = binding.element.clone();
            let classifier = ctx.classifier.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                for candidate in queued {
                    if let Err(e) = engine.add_ice_candidate(&element, &candidate).await {
                        let class = if classifier.is_benign(&e) { "benign" } else { "fatal" };
                        metrics::record_media_engine_error("add_ice_candidate", class);
                        warn!(target: "sfu.endpoint", endpoint = %name, error = %e, "Failed to flush queued ICE candidate");
                    }
                }
            });
        }
        true
    }

    fn start_listener(&self, binding: &MediaBinding, ctx: &Arc<EndpointContext>) {
        let engine = Arc::clone(binding.engine());
        // Subscribe before asking the node to emit events for the element.
        let mut events = engine.events();
        let element = binding.element.clone();
        let token = self.listener.clone();
        let signaling = Arc::clone(&ctx.signaling);
        let session_id = self.session_id.clone();
        let owner = self.owner.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            if let Err(e) = engine.watch_element(&element).await {
                warn!(target: "sfu.endpoint", endpoint = %name, error = %e, "Failed to watch element events");
            }
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) if event.element == element => match event.kind {
                            MediaEventKind::IceCandidate(candidate) => {
                                signaling.send_ice_candidate(&session_id, &owner, &name, &candidate);
                            }
                            MediaEventKind::MediaError { code, description } => {
                                warn!(target: "sfu.endpoint", endpoint = %name, code, error = %description, "Media element error");
                                signaling.send_media_error(&session_id, &owner, &description);
                            }
                        },
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "sfu.endpoint", endpoint = %name, skipped, "Endpoint listener lagged behind media events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!(target: "sfu.endpoint", endpoint = %name, "Endpoint listener stopped");
        });
    }

    /// Wait for the element, mapping readiness outcomes to client errors.
    pub async fn await_ready(&self, ctx: &EndpointContext) -> Result<MediaBinding, SfuError> {
        match self.readiness.wait(ctx.endpoint_timeout).await {
            Ok(binding) => Ok(binding),
            Err(ReadinessError::TimedOut) => Err(SfuError::EndpointTimeout(self.name.clone())),
            Err(ReadinessError::Failed(reason)) => Err(SfuError::EndpointCreation(reason)),
        }
    }

    /// Stop the listener and hand back the element, if one was built.
    ///
    /// Returns `None` on the second call. A construction still in flight
    /// releases its element when it completes.
    pub(crate) fn begin_release(&self) -> Option<MediaBinding> {
        {
            let mut state = self.state.lock();
            if state.released {
                return None;
            }
            state.released = true;
            state.queued_candidates.clear();
        }
        self.listener.cancel();
        self.readiness.fail("endpoint released");
        self.readiness.ready()
    }

    /// Deliver a remote candidate, queueing it until the element exists.
    pub async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
        classifier: &ErrorClassifier,
    ) -> Result<(), SfuError> {
        let binding = {
            let mut state = self.state.lock();
            if state.released {
                debug!(target: "sfu.endpoint", endpoint = %self.name, "Dropping ICE candidate for released endpoint");
                return Ok(());
            }
            match self.readiness.peek() {
                ReadyState::Ready(binding) => binding,
                ReadyState::Pending => {
                    state.queued_candidates.push(candidate);
                    return Ok(());
                }
                ReadyState::Failed(_) => {
                    debug!(target: "sfu.endpoint", endpoint = %self.name, "Dropping ICE candidate for failed endpoint");
                    return Ok(());
                }
            }
        };

        match binding
            .engine()
            .add_ice_candidate(&binding.element, &candidate)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if classifier.is_benign(&e) => {
                metrics::record_media_engine_error("add_ice_candidate", "benign");
                warn!(target: "sfu.endpoint", endpoint = %self.name, error = %e, "ICE candidate for released element ignored");
                Ok(())
            }
            Err(e) => {
                metrics::record_media_engine_error("add_ice_candidate", "fatal");
                Err(SfuError::MediaNegotiation(e.to_string()))
            }
        }
    }
}

/// Release an element in the background and log the outcome.
pub(crate) fn spawn_release(
    engine: Arc<dyn MediaEngine>,
    element: ElementId,
    classifier: ErrorClassifier,
) {
    tokio::spawn(async move {
        match engine.release(&element).await {
            Ok(()) => debug!(target: "sfu.endpoint", element = %element, "Media element released"),
            Err(e) if classifier.is_benign(&e) => {
                debug!(target: "sfu.endpoint", element = %element, error = %e, "Media element was already released");
            }
            Err(e) => {
                metrics::record_media_engine_error("release", "fatal");
                warn!(target: "sfu.endpoint", element = %element, error = %e, "Failed to release media element");
            }
        }
    });
}
