//! Abstract media engine capability.

use crate::models::IceCandidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

/// Handle of an element (pipeline, endpoint or filter) inside a media node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised by a media engine call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaEngineError {
    /// The node answered with an error object.
    #[error("Media server error {code}: {message}")]
    Server { code: i64, message: String },

    /// The connection to the node is unusable.
    #[error("Media server transport error: {0}")]
    Transport(String),

    /// The node did not answer in time.
    #[error("Media server call timed out")]
    Timeout,
}

impl MediaEngineError {
    /// Server error code, if the node produced one.
    pub fn code(&self) -> Option<i64> {
        match self {
            MediaEngineError::Server { code, .. } => Some(*code),
            MediaEngineError::Transport(_) | MediaEngineError::Timeout => None,
        }
    }
}

/// Outcome of re-establishing the connection to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Same server process; all elements survive.
    SameInstance,
    /// A different process answered; every element created before is gone.
    NewInstance,
}

/// Event raised by a watched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub element: ElementId,
    pub kind: MediaEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventKind {
    /// Local candidate gathered by a WebRTC endpoint.
    IceCandidate(IceCandidate),
    /// Asynchronous element failure.
    MediaError { code: i64, description: String },
}

/// Parameters of an external feed player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerOptions {
    pub uri: String,
    pub adaptive_bitrate: bool,
    pub network_cache: Option<u32>,
}

/// Operations a media-processing node offers the control plane.
///
/// All element handles are scoped to the node that created them.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a media pipeline that hosts a session's elements.
    async fn create_pipeline(&self) -> Result<ElementId, MediaEngineError>;

    /// Create a WebRTC endpoint in `pipeline`.
    async fn create_webrtc_endpoint(
        &self,
        pipeline: &ElementId,
    ) -> Result<ElementId, MediaEngineError>;

    /// Create a player endpoint pulling from an external URI.
    async fn create_player_endpoint(
        &self,
        pipeline: &ElementId,
        options: &PlayerOptions,
    ) -> Result<ElementId, MediaEngineError>;

    /// Create a filter element of the given type.
    async fn create_filter(
        &self,
        pipeline: &ElementId,
        filter_type: &str,
        options: &serde_json::Value,
    ) -> Result<ElementId, MediaEngineError>;

    /// Process an SDP offer and return the answer.
    async fn process_offer(
        &self,
        endpoint: &ElementId,
        sdp_offer: &str,
    ) -> Result<String, MediaEngineError>;

    /// Start gathering local ICE candidates.
    async fn gather_candidates(&self, endpoint: &ElementId) -> Result<(), MediaEngineError>;

    /// Add a remote ICE candidate.
    async fn add_ice_candidate(
        &self,
        endpoint: &ElementId,
        candidate: &IceCandidate,
    ) -> Result<(), MediaEngineError>;

    /// Route media from `source` to `sink`.
    async fn connect(&self, source: &ElementId, sink: &ElementId)
        -> Result<(), MediaEngineError>;

    /// Remove a route created by `connect`.
    async fn disconnect(
        &self,
        source: &ElementId,
        sink: &ElementId,
    ) -> Result<(), MediaEngineError>;

    /// Start a player endpoint.
    async fn play(&self, player: &ElementId) -> Result<(), MediaEngineError>;

    /// Stop a player endpoint.
    async fn stop(&self, player: &ElementId) -> Result<(), MediaEngineError>;

    /// Release an element and everything it owns.
    async fn release(&self, element: &ElementId) -> Result<(), MediaEngineError>;

    /// Subscribe to ICE candidate and error events of an element.
    async fn watch_element(&self, element: &ElementId) -> Result<(), MediaEngineError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), MediaEngineError>;

    /// Re-establish the connection, reporting whether the same server answered.
    async fn reconnect(&self) -> Result<ReconnectOutcome, MediaEngineError>;

    /// Stream of events for watched elements.
    fn events(&self) -> broadcast::Receiver<MediaEvent>;
}

/// How an engine error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The element disappeared under a concurrent operation; log and move on.
    BenignRace,
    /// Surface the error.
    Fatal,
}

/// Classifies engine errors by server error code.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    benign_codes: HashSet<i64>,
}

impl ErrorClassifier {
    pub fn new(benign_codes: impl IntoIterator<Item = i64>) -> Self {
        Self {
            benign_codes: benign_codes.into_iter().collect(),
        }
    }

    pub fn classify(&self, error: &MediaEngineError) -> ErrorClass {
        match error.code() {
            Some(code) if self.benign_codes.contains(&code) => ErrorClass::BenignRace,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_benign(&self, error: &MediaEngineError) -> bool {
        self.classify(error) == ErrorClass::BenignRace
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new([crate::config::DEFAULT_BENIGN_ERROR_CODE])
    }
}
