//! Outgoing media of one participant.

use super::filter::FilterSet;
use super::media_endpoint::MediaEndpoint;
use super::{EndpointContext, MediaBinding};
use crate::errors::SfuError;
use crate::media::PlayerOptions;
use crate::models::MediaOptions;
use crate::observability::metrics;
use common::types::{ParticipantPrivateId, ParticipantPublicId, SessionId, StreamId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A WebRTC endpoint, or a player endpoint for external feeds.
///
/// Each instance is one publisher generation: unpublishing replaces it with
/// a fresh instance, so subscribers can tell generations apart by pointer.
pub struct PublisherEndpoint {
    core: Arc<MediaEndpoint>,
    owner: ParticipantPublicId,
    media_options: RwLock<MediaOptions>,
    stream_id: RwLock<Option<StreamId>>,
    filters: FilterSet,
    /// Subscribers counted against an external feed that only plays while
    /// watched.
    feed_subscribers: tokio::sync::Mutex<u32>,
    streaming: AtomicBool,
}

impl PublisherEndpoint {
    pub fn new(
        session_id: SessionId,
        owner: ParticipantPublicId,
        owner_private: ParticipantPrivateId,
        media_options: MediaOptions,
        stream_id: Option<StreamId>,
    ) -> Self {
        Self {
            core: Arc::new(MediaEndpoint::new(
                owner.as_str(),
                "publisher",
                session_id,
                owner_private,
            )),
            owner,
            media_options: RwLock::new(media_options),
            stream_id: RwLock::new(stream_id),
            filters: FilterSet::new(),
            feed_subscribers: tokio::sync::Mutex::new(0),
            streaming: AtomicBool::new(false),
        }
    }

    pub fn core(&self) -> &Arc<MediaEndpoint> {
        &self.core
    }

    pub fn owner(&self) -> &ParticipantPublicId {
        &self.owner
    }

    pub fn media_options(&self) -> MediaOptions {
        self.media_options.read().clone()
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id.read().clone()
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub(crate) fn set_streaming(&self, streaming: bool) -> bool {
        self.streaming.swap(streaming, Ordering::SeqCst)
    }

    pub fn is_external_feed(&self) -> bool {
        self.media_options.read().is_external_feed()
    }

    /// Binding of a publisher that is streaming on the node's current epoch.
    pub fn publishing_binding(&self) -> Option<MediaBinding> {
        if !self.is_streaming() || self.core.is_released() {
            return None;
        }
        self.core.binding().filter(MediaBinding::is_current)
    }

    /// Fix the options and stream id for this generation. Called once by the
    /// caller that claimed construction.
    pub(crate) fn configure(&self, options: MediaOptions, desired: Option<StreamId>) -> StreamId {
        let stream_id = desired
            .or_else(|| self.stream_id())
            .unwrap_or_else(|| StreamId::for_publisher(options.type_label(), &self.owner));
        *self.media_options.write() = options;
        *self.stream_id.write() = Some(stream_id.clone());
        stream_id
    }

    /// Build the element in `pipeline` in the background.
    pub(crate) fn spawn_construction(&self, ctx: Arc<EndpointContext>, pipeline: MediaBinding) {
        let options = self.media_options();
        self.core.spawn_construction(ctx, async move {
            let engine = Arc::clone(pipeline.engine());
            let element = match &options.rtsp_uri {
                Some(uri) => {
                    let player = PlayerOptions {
                        uri: uri.clone(),
                        adaptive_bitrate: options.adaptive_bitrate,
                        network_cache: options.network_cache,
                    };
                    engine
                        .create_player_endpoint(&pipeline.pipeline, &player)
                        .await?
                }
                None => engine.create_webrtc_endpoint(&pipeline.pipeline).await?,
            };
            Ok(MediaBinding {
                node: pipeline.node,
                epoch: pipeline.epoch,
                pipeline: pipeline.pipeline,
                element,
            })
        });
    }

    /// Count a new subscriber of an external feed, starting the player on the
    /// first one.
    pub(crate) async fn feed_attach(&self, ctx: &EndpointContext) -> Result<(), SfuError> {
        let mut count = self.feed_subscribers.lock().await;
        if *count == 0 {
            let binding = self
                .core
                .binding()
                .ok_or_else(|| SfuError::RemoteNotPublishing(self.owner.to_string()))?;
            match binding.engine().play(&binding.element).await {
                Ok(()) => {
                    info!(target: "sfu.endpoint.publisher", participant = %self.owner, "External feed started for first subscriber");
                }
                Err(e) if ctx.classifier.is_benign(&e) => {
                    metrics::record_media_engine_error("play", "benign");
                    warn!(target: "sfu.endpoint.publisher", participant = %self.owner, error = %e, "External feed player already released");
                }
                Err(e) => {
                    metrics::record_media_engine_error("play", "fatal");
                    return Err(SfuError::MediaNegotiation(e.to_string()));
                }
            }
        }
        *count += 1;
        Ok(())
    }

    /// Uncount a subscriber, stopping the player when none remain.
    pub(crate) async fn feed_detach(&self, ctx: &EndpointContext) {
        let mut count = self.feed_subscribers.lock().await;
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count > 0 || self.core.is_released() {
            return;
        }
        let Some(binding) = self.core.binding() else {
            return;
        };
        match binding.engine().stop(&binding.element).await {
            Ok(()) => {
                info!(target: "sfu.endpoint.publisher", participant = %self.owner, "External feed stopped after last subscriber left");
            }
            Err(e) if ctx.classifier.is_benign(&e) => {}
            Err(e) => {
                metrics::record_media_engine_error("stop", "fatal");
                warn!(target: "sfu.endpoint.publisher", participant = %self.owner, error = %e, "Failed to stop external feed");
            }
        }
    }

    pub async fn feed_subscriber_count(&self) -> u32 {
        *self.feed_subscribers.lock().await
    }
}
