//! Publisher and subscriber endpoints of one participant.

use super::media_endpoint::spawn_release;
use super::publisher::PublisherEndpoint;
use super::subscriber::{Claim, SubscriberEndpoint};
use super::{EndpointContext, MediaBinding};
use crate::collaborators::cdr::{self, CdrEvent};
use crate::collaborators::RECORDER_PARTICIPANT_PUBLIC_ID;
use crate::errors::SfuError;
use crate::media::MediaEngineError;
use crate::models::{EndReason, IceCandidate, MediaOptions, PublisherInfo};
use crate::observability::metrics;
use crate::session::RoomSession;
use common::types::{ParticipantPrivateId, ParticipantPublicId, SessionId, StreamId};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Owns the media endpoints of one participant.
pub struct EndpointOrchestrator {
    ctx: Arc<EndpointContext>,
    session_id: SessionId,
    public_id: ParticipantPublicId,
    private_id: ParticipantPrivateId,
    /// `None` for participants that may not publish.
    publisher: RwLock<Option<Arc<PublisherEndpoint>>>,
    subscribers: DashMap<ParticipantPublicId, Arc<SubscriberEndpoint>>,
    closed: AtomicBool,
}

impl EndpointOrchestrator {
    pub fn new(
        ctx: Arc<EndpointContext>,
        session_id: SessionId,
        public_id: ParticipantPublicId,
        private_id: ParticipantPrivateId,
        publisher_options: Option<MediaOptions>,
    ) -> Self {
        let publisher = publisher_options.map(|options| {
            Arc::new(PublisherEndpoint::new(
                session_id.clone(),
                public_id.clone(),
                private_id.clone(),
                options,
                None,
            ))
        });
        Self {
            ctx,
            session_id,
            public_id,
            private_id,
            publisher: RwLock::new(publisher),
            subscribers: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn public_id(&self) -> &ParticipantPublicId {
        &self.public_id
    }

    pub fn private_id(&self) -> &ParticipantPrivateId {
        &self.private_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current publisher generation.
    pub fn publisher(&self) -> Option<Arc<PublisherEndpoint>> {
        self.publisher.read().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.publisher().is_some_and(|p| p.is_streaming())
    }

    /// Stream id of the streaming publisher.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.publisher()
            .filter(|p| p.is_streaming())
            .and_then(|p| p.stream_id())
    }

    pub fn publisher_info(&self) -> Option<PublisherInfo> {
        let publisher = self.publisher().filter(|p| p.is_streaming())?;
        Some(PublisherInfo {
            stream_id: publisher.stream_id()?.to_string(),
            created_at: publisher.core().created_at_ms(),
            media_options: publisher.media_options(),
        })
    }

    pub fn subscriber(&self, remote: &ParticipantPublicId) -> Option<Arc<SubscriberEndpoint>> {
        self.subscribers.get(remote).map(|s| Arc::clone(s.value()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Stream ids this participant is receiving.
    pub fn subscribed_streams(&self) -> Vec<StreamId> {
        let mut streams: Vec<StreamId> = self
            .subscribers
            .iter()
            .filter(|s| s.core().binding().is_some())
            .filter_map(|s| s.stream_id())
            .collect();
        streams.sort();
        streams
    }

    /// Publisher of a participant that is streaming on a live node.
    fn publishing(&self) -> Option<(Arc<PublisherEndpoint>, MediaBinding)> {
        let publisher = self.publisher()?;
        let binding = publisher.publishing_binding()?;
        Some((publisher, binding))
    }

    fn is_current_publisher(&self, publisher: &Arc<PublisherEndpoint>) -> bool {
        self.publisher
            .read()
            .as_ref()
            .is_some_and(|p| Arc::ptr_eq(p, publisher))
    }

    fn publisher_slot(&self) -> Result<Arc<PublisherEndpoint>, SfuError> {
        if self.is_closed() {
            return Err(SfuError::ParticipantNotFound(self.public_id.to_string()));
        }
        self.publisher().ok_or_else(|| {
            SfuError::Forbidden(format!("participant {} cannot publish", self.public_id))
        })
    }

    /// Swap `current` for a fresh generation with the same media options.
    /// Returns the new generation, or `None` if `current` was already
    /// replaced.
    fn replace_publisher(
        &self,
        current: &Arc<PublisherEndpoint>,
        stream_id: Option<StreamId>,
    ) -> Option<Arc<PublisherEndpoint>> {
        let mut slot = self.publisher.write();
        match slot.as_ref() {
            Some(p) if Arc::ptr_eq(p, current) => {
                let fresh = Arc::new(PublisherEndpoint::new(
                    self.session_id.clone(),
                    self.public_id.clone(),
                    self.private_id.clone(),
                    current.media_options(),
                    stream_id,
                ));
                *slot = Some(Arc::clone(&fresh));
                Some(fresh)
            }
            _ => None,
        }
    }

    /// Drop a half-built publisher so the next attempt starts clean.
    fn discard_publisher(&self, publisher: &Arc<PublisherEndpoint>) {
        self.replace_publisher(publisher, None);
        if let Some(binding) = publisher.core().begin_release() {
            spawn_release(
                Arc::clone(binding.engine()),
                binding.element,
                self.ctx.classifier.clone(),
            );
        }
    }

    // ------------------------------------------------------------------
    // Publisher
    // ------------------------------------------------------------------

    /// Build this participant's publisher endpoint and register its stream.
    ///
    /// Concurrent callers share one construction. A caller that joins an
    /// existing construction gets its stream id regardless of the options it
    /// passed.
    ///
    /// # Errors
    ///
    /// `EndpointTimeout` if the endpoint is not ready in time,
    /// `EndpointCreation` if the node failed to build it,
    /// `Forbidden` if the participant may not publish.
    #[instrument(skip_all, name = "sfu.endpoint.create_publisher", fields(session_id = %self.session_id, participant = %self.public_id))]
    pub async fn create_publisher(
        &self,
        session: &RoomSession,
        media_options: MediaOptions,
        desired_stream_id: Option<StreamId>,
    ) -> Result<StreamId, SfuError> {
        let publisher = self.publisher_slot()?;
        self.build_publisher(session, &publisher, media_options, desired_stream_id)
            .await
    }

    async fn build_publisher(
        &self,
        session: &RoomSession,
        publisher: &Arc<PublisherEndpoint>,
        media_options: MediaOptions,
        desired_stream_id: Option<StreamId>,
    ) -> Result<StreamId, SfuError> {
        if publisher.core().try_claim_creation() {
            publisher.configure(media_options, desired_stream_id);
            match session.ensure_pipeline().await {
                Ok(pipeline) => publisher.spawn_construction(Arc::clone(&self.ctx), pipeline),
                Err(e) => {
                    publisher.core().abort_creation(&e.to_string());
                    self.discard_publisher(publisher);
                    return Err(e);
                }
            }
        }

        if let Err(e) = publisher.core().await_ready(&self.ctx).await {
            warn!(target: "sfu.endpoint.publisher", error = %e, "Publisher endpoint not ready; slot reset");
            self.discard_publisher(publisher);
            return Err(e);
        }

        let stream_id = publisher
            .stream_id()
            .ok_or_else(|| SfuError::Internal("ready publisher without stream id".to_string()))?;
        if session.register_stream(&stream_id, &self.private_id) {
            debug!(target: "sfu.endpoint.publisher", stream_id = %stream_id, "Stream registered");
        }
        Ok(stream_id)
    }

    /// Ready publisher on the node's current epoch, rebuilding a stale one.
    async fn ready_publisher(
        &self,
        session: &RoomSession,
    ) -> Result<(Arc<PublisherEndpoint>, MediaBinding), SfuError> {
        let publisher = self.publisher_slot()?;
        self.build_publisher(
            session,
            &publisher,
            publisher.media_options(),
            publisher.stream_id(),
        )
        .await?;

        let binding = publisher
            .core()
            .binding()
            .ok_or(SfuError::StaleEndpointRace)?;
        if binding.is_current() {
            return Ok((publisher, binding));
        }

        info!(
            target: "sfu.endpoint.publisher",
            participant = %self.public_id,
            node_id = %binding.node.id(),
            "Publisher was built on a replaced media server instance; rebuilding"
        );
        let stream_id = publisher.stream_id();
        let fresh = self
            .replace_publisher(&publisher, stream_id.clone())
            .ok_or(SfuError::StaleEndpointRace)?;
        if let Some(old) = publisher.core().begin_release() {
            spawn_release(
                Arc::clone(old.engine()),
                old.element,
                self.ctx.classifier.clone(),
            );
        }
        self.build_publisher(session, &fresh, fresh.media_options(), stream_id)
            .await?;
        let binding = fresh
            .core()
            .binding()
            .filter(MediaBinding::is_current)
            .ok_or(SfuError::StaleEndpointRace)?;
        Ok((fresh, binding))
    }

    fn negotiation_error(&self, operation: &'static str, e: MediaEngineError) -> SfuError {
        if self.ctx.classifier.is_benign(&e) {
            metrics::record_media_engine_error(operation, "benign");
            warn!(target: "sfu.endpoint.publisher", participant = %self.public_id, operation, error = %e, "Publisher element released during negotiation");
            SfuError::StaleEndpointRace
        } else {
            metrics::record_media_engine_error(operation, "fatal");
            error!(target: "sfu.endpoint.publisher", participant = %self.public_id, operation, error = %e, "Publisher negotiation failed");
            SfuError::MediaNegotiation(e.to_string())
        }
    }

    /// Negotiate the publisher and start streaming. Returns the SDP answer.
    ///
    /// # Errors
    ///
    /// Construction errors as for [`Self::create_publisher`];
    /// `MediaNegotiation` if the node rejects the offer;
    /// `StaleEndpointRace` if the element vanished during negotiation.
    #[instrument(skip_all, name = "sfu.endpoint.publish", fields(session_id = %self.session_id, participant = %self.public_id, loopback = loopback))]
    pub async fn publish(
        &self,
        session: &RoomSession,
        sdp_offer: &str,
        loopback: bool,
        silent: bool,
    ) -> Result<String, SfuError> {
        let (publisher, binding) = self.ready_publisher(session).await?;
        let engine = binding.engine();

        let answer = engine
            .process_offer(&binding.element, sdp_offer)
            .await
            .map_err(|e| self.negotiation_error("process_offer", e))?;
        engine
            .gather_candidates(&binding.element)
            .await
            .map_err(|e| self.negotiation_error("gather_candidates", e))?;
        if loopback {
            engine
                .connect(&binding.element, &binding.element)
                .await
                .map_err(|e| self.negotiation_error("connect", e))?;
        }

        self.start_streaming(session, &publisher, silent).await;
        Ok(answer)
    }

    /// Build and start a publisher that pulls an external feed.
    ///
    /// The player starts right away unless it only plays while watched.
    ///
    /// # Errors
    ///
    /// As for [`Self::create_publisher`], plus `MediaNegotiation` if the
    /// player cannot be started.
    #[instrument(skip_all, name = "sfu.endpoint.publish_external_feed", fields(session_id = %self.session_id, participant = %self.public_id))]
    pub async fn publish_external_feed(&self, session: &RoomSession) -> Result<StreamId, SfuError> {
        let (publisher, binding) = self.ready_publisher(session).await?;
        let stream_id = publisher
            .stream_id()
            .ok_or_else(|| SfuError::Internal("ready publisher without stream id".to_string()))?;

        if !publisher.media_options().only_play_with_subscribers {
            binding
                .engine()
                .play(&binding.element)
                .await
                .map_err(|e| self.negotiation_error("play", e))?;
        }

        self.start_streaming(session, &publisher, false).await;
        Ok(stream_id)
    }

    async fn start_streaming(
        &self,
        session: &RoomSession,
        publisher: &Arc<PublisherEndpoint>,
        silent: bool,
    ) {
        if publisher.set_streaming(true) {
            debug!(target: "sfu.endpoint.publisher", participant = %self.public_id, "Publisher renegotiated");
            return;
        }
        session.register_publisher();
        let Some(stream_id) = publisher.stream_id() else {
            return;
        };

        if self.ctx.recording.session_is_being_recorded(&self.session_id) {
            if let Err(e) = self
                .ctx
                .recording
                .start_individual_stream_recording(&self.session_id, &self.public_id, &stream_id)
                .await
            {
                warn!(target: "sfu.endpoint.publisher", stream_id = %stream_id, error = %e, "Failed to start stream recording");
            }
        }

        if !silent {
            cdr::emit(
                self.ctx.cdr.as_ref(),
                CdrEvent::NewPublisher {
                    session: self.session_id.clone(),
                    participant: self.public_id.clone(),
                    stream: stream_id.clone(),
                    media_options: publisher.media_options(),
                    at_ms: chrono::Utc::now().timestamp_millis(),
                },
            );
        }
        info!(target: "sfu.endpoint.publisher", participant = %self.public_id, stream_id = %stream_id, "Publisher streaming");
    }

    /// Tear down the publisher and install a fresh generation with the same
    /// media options. Returns the stream id if it was streaming.
    #[instrument(skip_all, name = "sfu.endpoint.unpublish", fields(session_id = %self.session_id, participant = %self.public_id, reason = reason.as_str()))]
    pub async fn unpublish(&self, session: &RoomSession, reason: EndReason) -> Option<StreamId> {
        let publisher = self.publisher()?;
        self.replace_publisher(&publisher, None)?;
        let stream_id = publisher.stream_id();
        let was_streaming = self
            .release_publisher(session, &publisher, reason, None, false)
            .await;
        stream_id.filter(|_| was_streaming)
    }

    /// Returns whether the publisher was streaming.
    async fn release_publisher(
        &self,
        session: &RoomSession,
        publisher: &Arc<PublisherEndpoint>,
        reason: EndReason,
        stopped_at_ms: Option<i64>,
        silent: bool,
    ) -> bool {
        let stream_id = publisher.stream_id();
        let was_streaming = publisher.is_streaming();

        if let Some(stream_id) = &stream_id {
            session.unregister_stream(stream_id);
            if was_streaming && self.ctx.recording.session_is_being_recorded(&self.session_id) {
                if let Err(e) = self
                    .ctx
                    .recording
                    .stop_individual_stream_recording(&self.session_id, stream_id, stopped_at_ms)
                    .await
                {
                    warn!(target: "sfu.endpoint.publisher", stream_id = %stream_id, error = %e, "Failed to stop stream recording");
                }
            }
        }

        if let Some(binding) = publisher.core().begin_release() {
            let publisher = Arc::clone(publisher);
            let classifier = self.ctx.classifier.clone();
            tokio::spawn(async move {
                publisher.filters().detach_all(&binding, &classifier).await;
                spawn_release(Arc::clone(binding.engine()), binding.element, classifier);
            });
        }

        publisher.set_streaming(false);
        if was_streaming {
            session.deregister_publisher();
            if !silent {
                if let Some(stream_id) = stream_id {
                    cdr::emit(
                        self.ctx.cdr.as_ref(),
                        CdrEvent::StopPublisher {
                            session: self.session_id.clone(),
                            participant: self.public_id.clone(),
                            stream: stream_id,
                            reason,
                            at_ms: chrono::Utc::now().timestamp_millis(),
                        },
                    );
                }
            }
        }
        info!(
            target: "sfu.endpoint.publisher",
            participant = %self.public_id,
            reason = reason.as_str(),
            was_streaming,
            "Publisher released"
        );
        was_streaming
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Subscriber endpoint for `remote`, created if absent. Concurrent
    /// callers all get the same instance.
    pub fn get_or_create_subscriber(
        &self,
        remote: &ParticipantPublicId,
    ) -> Arc<SubscriberEndpoint> {
        let entry = self.subscribers.entry(remote.clone()).or_insert_with(|| {
            Arc::new(SubscriberEndpoint::new(
                self.session_id.clone(),
                self.public_id.clone(),
                self.private_id.clone(),
                remote.clone(),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Remove `subscriber` from the map if it is still the registered one.
    fn remove_subscriber_if(
        &self,
        remote: &ParticipantPublicId,
        subscriber: &Arc<SubscriberEndpoint>,
    ) -> bool {
        self.subscribers
            .remove_if(remote, |_, s| Arc::ptr_eq(s, subscriber))
            .is_some()
    }

    /// `subscriber` is still the registered, unreleased subscription to
    /// `remote`.
    fn holds_subscriber(
        &self,
        remote: &ParticipantPublicId,
        subscriber: &Arc<SubscriberEndpoint>,
    ) -> bool {
        !subscriber.core().is_released()
            && self
                .subscribers
                .get(remote)
                .is_some_and(|s| Arc::ptr_eq(s.value(), subscriber))
    }

    /// Remove and release a subscriber that never started receiving.
    fn discard_subscriber(&self, remote: &ParticipantPublicId, subscriber: &Arc<SubscriberEndpoint>) {
        self.remove_subscriber_if(remote, subscriber);
        if let Some(binding) = subscriber.core().begin_release() {
            spawn_release(
                Arc::clone(binding.engine()),
                binding.element,
                self.ctx.classifier.clone(),
            );
        }
    }

    /// Receive `sender`'s stream. Returns the SDP answer, or `None` if a
    /// concurrent operation made this call redundant.
    ///
    /// # Errors
    ///
    /// `LoopbackNotAllowed` when `sender` is this participant,
    /// `RemoteNotPublishing` when `sender` has no live publisher,
    /// `EndpointTimeout`/`EndpointCreation` on construction failure,
    /// `MediaNegotiation` when the node rejects the offer.
    #[instrument(skip_all, name = "sfu.endpoint.subscribe", fields(session_id = %self.session_id, participant = %self.public_id, remote = %sender.public_id))]
    pub async fn subscribe(
        &self,
        sender: &EndpointOrchestrator,
        sdp_offer: &str,
        silent: bool,
    ) -> Result<Option<String>, SfuError> {
        match self.subscribe_to(sender, sdp_offer, silent).await {
            Err(SfuError::StaleEndpointRace) => {
                debug!(target: "sfu.endpoint.subscriber", remote = %sender.public_id, "Subscription superseded by a concurrent operation");
                Ok(None)
            }
            other => other,
        }
    }

    async fn subscribe_to(
        &self,
        sender: &EndpointOrchestrator,
        sdp_offer: &str,
        silent: bool,
    ) -> Result<Option<String>, SfuError> {
        if sender.public_id == self.public_id {
            return Err(SfuError::LoopbackNotAllowed);
        }
        let remote = sender.public_id.clone();
        let (publisher, sender_binding) = sender
            .publishing()
            .ok_or_else(|| SfuError::RemoteNotPublishing(remote.to_string()))?;
        let stream_id = publisher
            .stream_id()
            .ok_or_else(|| SfuError::RemoteNotPublishing(remote.to_string()))?;

        let subscriber = loop {
            let candidate = self.get_or_create_subscriber(&remote);
            match candidate.claim(&publisher, stream_id.clone()) {
                Claim::Claimed => break candidate,
                Claim::Taken => {
                    debug!(target: "sfu.endpoint.subscriber", remote = %remote, "Subscriber already being built");
                    return Ok(None);
                }
                Claim::Stale => {
                    if self.remove_subscriber_if(&remote, &candidate) {
                        self.release_subscriber(&candidate, EndReason::Unsubscribe, true)
                            .await;
                    }
                }
            }
        };

        subscriber.spawn_construction(Arc::clone(&self.ctx), sender_binding.clone());
        let binding = match subscriber.core().await_ready(&self.ctx).await {
            Ok(binding) => binding,
            Err(e) => {
                warn!(target: "sfu.endpoint.subscriber", remote = %remote, error = %e, "Subscriber endpoint not ready; removed");
                self.discard_subscriber(&remote, &subscriber);
                return Err(e);
            }
        };

        if !sender.is_current_publisher(&publisher) {
            self.discard_subscriber(&remote, &subscriber);
            return Err(SfuError::StaleEndpointRace);
        }

        let engine = binding.engine();
        let negotiated = async {
            engine.connect(&sender_binding.element, &binding.element).await?;
            let answer = engine.process_offer(&binding.element, sdp_offer).await?;
            engine.gather_candidates(&binding.element).await?;
            Ok::<_, MediaEngineError>(answer)
        }
        .await;

        let answer = match negotiated {
            Ok(answer) => answer,
            Err(e) if self.ctx.classifier.is_benign(&e) => {
                metrics::record_media_engine_error("subscribe", "benign");
                warn!(
                    target: "sfu.endpoint.subscriber",
                    endpoint = %subscriber.endpoint_name(),
                    error = %e,
                    "Element released while subscribing; subscription dropped"
                );
                self.discard_subscriber(&remote, &subscriber);
                return Ok(None);
            }
            Err(e) => {
                metrics::record_media_engine_error("subscribe", "fatal");
                error!(
                    target: "sfu.endpoint.subscriber",
                    endpoint = %subscriber.endpoint_name(),
                    error = %e,
                    "Subscriber negotiation failed"
                );
                self.discard_subscriber(&remote, &subscriber);
                return Err(SfuError::MediaNegotiation(e.to_string()));
            }
        };

        if !self.holds_subscriber(&remote, &subscriber) {
            debug!(target: "sfu.endpoint.subscriber", endpoint = %subscriber.endpoint_name(), "Subscription cancelled while negotiating");
            return Ok(None);
        }

        if publisher.media_options().only_play_with_subscribers {
            if let Err(e) = publisher.feed_attach(&self.ctx).await {
                self.discard_subscriber(&remote, &subscriber);
                return Err(e);
            }
            subscriber.mark_counted_for_feed();
            // A cancel racing the attach may have missed the count; whoever
            // takes it first gives it back.
            if !self.holds_subscriber(&remote, &subscriber) {
                if let Some(publisher) = subscriber.take_feed_count() {
                    publisher.feed_detach(&self.ctx).await;
                }
                debug!(target: "sfu.endpoint.subscriber", endpoint = %subscriber.endpoint_name(), "Subscription cancelled while starting external feed");
                return Ok(None);
            }
        }

        if !silent && self.public_id.as_str() != RECORDER_PARTICIPANT_PUBLIC_ID {
            cdr::emit(
                self.ctx.cdr.as_ref(),
                CdrEvent::NewSubscriber {
                    session: self.session_id.clone(),
                    participant: self.public_id.clone(),
                    sender: remote.clone(),
                    stream: stream_id,
                    at_ms: chrono::Utc::now().timestamp_millis(),
                },
            );
        }
        info!(target: "sfu.endpoint.subscriber", endpoint = %subscriber.endpoint_name(), "Subscriber receiving");
        Ok(Some(answer))
    }

    /// Stop receiving `remote`'s stream. Returns `false` if there was no
    /// such subscription.
    #[instrument(skip_all, name = "sfu.endpoint.cancel_subscription", fields(session_id = %self.session_id, participant = %self.public_id, remote = %remote))]
    pub async fn cancel_subscription(
        &self,
        remote: &ParticipantPublicId,
        reason: EndReason,
        silent: bool,
    ) -> bool {
        match self.subscribers.remove(remote) {
            Some((_, subscriber)) => {
                self.release_subscriber(&subscriber, reason, silent).await;
                true
            }
            None => {
                warn!(target: "sfu.endpoint.subscriber", remote = %remote, "No subscription to cancel");
                false
            }
        }
    }

    async fn release_subscriber(
        &self,
        subscriber: &Arc<SubscriberEndpoint>,
        reason: EndReason,
        silent: bool,
    ) {
        let was_receiving = subscriber.core().binding().is_some();
        if let Some(binding) = subscriber.core().begin_release() {
            spawn_release(
                Arc::clone(binding.engine()),
                binding.element,
                self.ctx.classifier.clone(),
            );
        }
        if silent {
            return;
        }
        if let Some(publisher) = subscriber.take_feed_count() {
            publisher.feed_detach(&self.ctx).await;
        }
        if was_receiving && self.public_id.as_str() != RECORDER_PARTICIPANT_PUBLIC_ID {
            if let Some(stream_id) = subscriber.stream_id() {
                cdr::emit(
                    self.ctx.cdr.as_ref(),
                    CdrEvent::StopSubscriber {
                        session: self.session_id.clone(),
                        participant: self.public_id.clone(),
                        sender: subscriber.remote().clone(),
                        stream: stream_id,
                        reason,
                        at_ms: chrono::Utc::now().timestamp_millis(),
                    },
                );
            }
        }
        debug!(target: "sfu.endpoint.subscriber", endpoint = %subscriber.endpoint_name(), reason = reason.as_str(), "Subscriber released");
    }

    // ------------------------------------------------------------------
    // ICE and filters
    // ------------------------------------------------------------------

    /// Route a remote candidate to the publisher (own public id) or to the
    /// subscriber for `endpoint_name`.
    ///
    /// # Errors
    ///
    /// `MediaNegotiation` if the node rejects the candidate.
    pub async fn add_ice_candidate(
        &self,
        endpoint_name: &str,
        candidate: IceCandidate,
    ) -> Result<(), SfuError> {
        if endpoint_name == self.public_id.as_str() {
            let publisher = self.publisher_slot()?;
            publisher
                .core()
                .add_ice_candidate(candidate, &self.ctx.classifier)
                .await
        } else {
            let subscriber =
                self.get_or_create_subscriber(&ParticipantPublicId::new(endpoint_name));
            subscriber
                .core()
                .add_ice_candidate(candidate, &self.ctx.classifier)
                .await
        }
    }

    /// # Errors
    ///
    /// `StreamNotFound` if the participant is not streaming.
    pub async fn attach_filter(
        &self,
        filter_type: &str,
        options: Value,
    ) -> Result<String, SfuError> {
        let publisher = self.publisher_slot()?;
        let binding = publisher
            .publishing_binding()
            .ok_or_else(|| SfuError::StreamNotFound(self.public_id.to_string()))?;
        publisher
            .filters()
            .attach(&binding, filter_type, options)
            .await
    }

    /// Returns `false` if the filter was already gone.
    pub async fn detach_filter(&self, filter_id: &str) -> bool {
        let Some(publisher) = self.publisher() else {
            return false;
        };
        let Some(binding) = publisher.core().binding() else {
            return false;
        };
        publisher
            .filters()
            .detach(&binding, filter_id, &self.ctx.classifier)
            .await
    }

    pub async fn detach_all_filters(&self) {
        let Some(publisher) = self.publisher() else {
            return;
        };
        if let Some(binding) = publisher.core().binding() {
            publisher
                .filters()
                .detach_all(&binding, &self.ctx.classifier)
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release every endpoint. A second call only logs.
    #[instrument(skip_all, name = "sfu.endpoint.close", fields(session_id = %self.session_id, participant = %self.public_id, reason = reason.as_str()))]
    pub async fn close(&self, session: &RoomSession, reason: EndReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!(target: "sfu.endpoint", participant = %self.public_id, "Endpoints already closed");
            return;
        }

        let remotes: Vec<ParticipantPublicId> =
            self.subscribers.iter().map(|s| s.key().clone()).collect();
        for remote in remotes {
            if let Some((_, subscriber)) = self.subscribers.remove(&remote) {
                self.release_subscriber(&subscriber, reason, false).await;
            }
        }

        let publisher = self.publisher.write().take();
        if let Some(publisher) = publisher {
            self.release_publisher(session, &publisher, reason, None, false)
                .await;
        }
    }

    /// React to the media server behind this participant's endpoints being
    /// replaced by a new instance.
    ///
    /// Lost subscribers are dropped. A lost publisher stops streaming but
    /// keeps its stream id, and is rebuilt on the next publish.
    pub async fn handle_media_server_lost(&self, session: &RoomSession, disconnected_at_ms: i64) {
        let stale: Vec<(ParticipantPublicId, Arc<SubscriberEndpoint>)> = self
            .subscribers
            .iter()
            .filter(|s| s.core().binding().is_some_and(|b| !b.is_current()))
            .map(|s| (s.key().clone(), Arc::clone(s.value())))
            .collect();
        for (remote, subscriber) in stale {
            if self.remove_subscriber_if(&remote, &subscriber) {
                self.release_subscriber(&subscriber, EndReason::MediaServerDisconnect, true)
                    .await;
            }
        }

        let Some(publisher) = self.publisher() else {
            return;
        };
        let lost = publisher
            .core()
            .binding()
            .is_some_and(|b| !b.is_current());
        if !lost || !publisher.set_streaming(false) {
            return;
        }
        session.deregister_publisher();
        if let Some(stream_id) = publisher.stream_id() {
            if self.ctx.recording.session_is_being_recorded(&self.session_id) {
                if let Err(e) = self
                    .ctx
                    .recording
                    .stop_individual_stream_recording(
                        &self.session_id,
                        &stream_id,
                        Some(disconnected_at_ms),
                    )
                    .await
                {
                    warn!(target: "sfu.endpoint.publisher", stream_id = %stream_id, error = %e, "Failed to stop stream recording");
                }
            }
        }
        self.ctx.signaling.send_media_error(
            &self.session_id,
            &self.private_id,
            "Media server connection lost; publish again to resume",
        );
        warn!(target: "sfu.endpoint.publisher", participant = %self.public_id, "Publisher lost with its media server");
    }
}
