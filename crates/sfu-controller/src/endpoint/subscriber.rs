//! Incoming media of one participant from one remote publisher.

use super::media_endpoint::MediaEndpoint;
use super::publisher::PublisherEndpoint;
use super::{EndpointContext, MediaBinding};
use common::types::{ParticipantPrivateId, ParticipantPublicId, SessionId, StreamId};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct Source {
    publisher: Weak<PublisherEndpoint>,
    stream_id: StreamId,
    counted_for_feed: bool,
}

/// Outcome of trying to claim construction of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller must build the endpoint.
    Claimed,
    /// Someone else is building, or has built, the endpoint for the same
    /// publisher generation.
    Taken,
    /// The endpoint belongs to an earlier publisher generation.
    Stale,
}

pub struct SubscriberEndpoint {
    core: Arc<MediaEndpoint>,
    local: ParticipantPublicId,
    remote: ParticipantPublicId,
    source: Mutex<Option<Source>>,
}

impl SubscriberEndpoint {
    pub fn new(
        session_id: SessionId,
        local: ParticipantPublicId,
        local_private: ParticipantPrivateId,
        remote: ParticipantPublicId,
    ) -> Self {
        Self {
            core: Arc::new(MediaEndpoint::new(
                remote.as_str(),
                "subscriber",
                session_id,
                local_private,
            )),
            local,
            remote,
            source: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &Arc<MediaEndpoint> {
        &self.core
    }

    pub fn remote(&self) -> &ParticipantPublicId {
        &self.remote
    }

    /// Stream id of the publisher this endpoint receives, once claimed.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.source.lock().as_ref().map(|s| s.stream_id.clone())
    }

    /// Element label: `<localPublicId>_<senderStreamId>`.
    pub fn endpoint_name(&self) -> String {
        match self.stream_id() {
            Some(stream) => format!("{}_{stream}", self.local),
            None => format!("{}_{}", self.local, self.remote),
        }
    }

    /// Claim construction for `publisher`'s current generation.
    pub(crate) fn claim(&self, publisher: &Arc<PublisherEndpoint>, stream_id: StreamId) -> Claim {
        let mut source = self.source.lock();
        if let Some(existing) = source.as_ref() {
            return if std::ptr::eq(existing.publisher.as_ptr(), Arc::as_ptr(publisher)) {
                Claim::Taken
            } else {
                Claim::Stale
            };
        }
        if !self.core.try_claim_creation() {
            // Claimed without a source only happens after release.
            return Claim::Stale;
        }
        *source = Some(Source {
            publisher: Arc::downgrade(publisher),
            stream_id,
            counted_for_feed: false,
        });
        Claim::Claimed
    }

    pub(crate) fn source_publisher(&self) -> Option<Arc<PublisherEndpoint>> {
        self.source.lock().as_ref().and_then(|s| s.publisher.upgrade())
    }

    pub(crate) fn mark_counted_for_feed(&self) {
        if let Some(source) = self.source.lock().as_mut() {
            source.counted_for_feed = true;
        }
    }

    /// Take the feed count this subscriber holds, if any. Returns the
    /// publisher generation it was counted against, once.
    pub(crate) fn take_feed_count(&self) -> Option<Arc<PublisherEndpoint>> {
        let mut source = self.source.lock();
        let source = source.as_mut()?;
        if !source.counted_for_feed {
            return None;
        }
        source.counted_for_feed = false;
        source.publisher.upgrade()
    }

    /// Build the endpoint in the sender's pipeline.
    pub(crate) fn spawn_construction(&self, ctx: Arc<EndpointContext>, sender: MediaBinding) {
        self.core.spawn_construction(ctx, async move {
            let element = sender
                .engine()
                .create_webrtc_endpoint(&sender.pipeline)
                .await?;
            Ok(MediaBinding {
                node: sender.node,
                epoch: sender.epoch,
                pipeline: sender.pipeline,
                element,
            })
        });
    }
}
