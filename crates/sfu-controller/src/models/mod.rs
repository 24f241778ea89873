//! SFU controller models.
//!
//! Domain enums shared by the session layer and the JSON shapes of the REST
//! surface. Wire names follow the client SDK conventions (camelCase fields,
//! SCREAMING_SNAKE_CASE enum values).

use crate::errors::SfuError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Can only receive media.
    Subscriber,
    /// Can send and receive media.
    #[default]
    Publisher,
    /// Publisher that may also force-disconnect and force-unpublish others.
    Moderator,
}

impl Role {
    /// Returns the wire representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Subscriber => "SUBSCRIBER",
            Role::Publisher => "PUBLISHER",
            Role::Moderator => "MODERATOR",
        }
    }

    /// Whether a participant with this role owns a publisher endpoint.
    pub fn is_publisher_capable(&self) -> bool {
        matches!(self, Role::Publisher | Role::Moderator)
    }
}

/// How media flows between participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaMode {
    /// Peer to peer; the media node is not involved.
    Relayed,
    /// Through the media node.
    #[default]
    Routed,
}

/// When session recording starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingMode {
    /// As soon as the first participant publishes.
    Always,
    /// Only through the recordings API.
    #[default]
    Manual,
}

/// Recording output kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputMode {
    /// One mixed file for the whole session.
    #[default]
    Composed,
    /// One file per published stream.
    Individual,
}

/// Layout of a composed recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingLayout {
    #[default]
    BestFit,
    PictureInPicture,
    VerticalPresentation,
    HorizontalPresentation,
    Custom,
}

/// Parse an enum from its wire name, mapping failures to `BadRequest`.
///
/// # Errors
///
/// Returns `SfuError::BadRequest` naming the field when the value is not one
/// of the enum's wire names.
pub fn parse_wire_enum<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, SfuError> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|_| {
        SfuError::BadRequest(format!("Parameter '{field}' has invalid value '{value}'"))
    })
}

/// Properties fixed at session creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionProperties {
    pub media_mode: MediaMode,
    pub recording_mode: RecordingMode,
    pub default_output_mode: OutputMode,
    pub default_recording_layout: RecordingLayout,
    pub default_custom_layout: String,
    pub custom_session_id: Option<String>,
}

/// Media characteristics of a published stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOptions {
    pub has_audio: bool,
    pub has_video: bool,
    #[serde(default = "default_true")]
    pub audio_active: bool,
    #[serde(default = "default_true")]
    pub video_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_of_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_dimensions: Option<String>,
    /// Source URI for external feeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp_uri: Option<String>,
    #[serde(default = "default_true", rename = "adaptativeBitrate")]
    pub adaptive_bitrate: bool,
    /// External feed plays only while at least one subscriber is attached.
    #[serde(default)]
    pub only_play_with_subscribers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_cache: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            has_audio: true,
            has_video: true,
            audio_active: true,
            video_active: true,
            type_of_video: None,
            frame_rate: None,
            video_dimensions: None,
            rtsp_uri: None,
            adaptive_bitrate: true,
            only_play_with_subscribers: false,
            network_cache: None,
        }
    }
}

impl MediaOptions {
    /// Media type used to label stream ids: the video type when the stream
    /// carries video (`CAMERA` unless stated), `MICRO` otherwise.
    pub fn type_label(&self) -> &str {
        if self.has_video {
            self.type_of_video.as_deref().unwrap_or("CAMERA")
        } else {
            "MICRO"
        }
    }

    /// Whether the stream is pulled from an external URI.
    pub fn is_external_feed(&self) -> bool {
        self.rtsp_uri.is_some()
    }
}

/// Per-token media limits and permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TokenOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_max_recv_bandwidth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_min_recv_bandwidth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_max_send_bandwidth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_min_send_bandwidth: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_filters: Vec<String>,
}

impl TokenOptions {
    /// Whether the token permits attaching a filter of this type.
    pub fn allows_filter(&self, filter_type: &str) -> bool {
        self.allowed_filters.iter().any(|f| f == filter_type)
    }
}

/// An ICE candidate exchanged with a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

/// Why a participant, stream or session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Unpublish,
    Unsubscribe,
    Disconnect,
    ForceUnpublishByServer,
    ForceDisconnectByServer,
    SessionClosedByServer,
    LastParticipantLeft,
    MediaServerDisconnect,
    EndpointFailure,
}

impl EndReason {
    /// Wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Unpublish => "unpublish",
            EndReason::Unsubscribe => "unsubscribe",
            EndReason::Disconnect => "disconnect",
            EndReason::ForceUnpublishByServer => "forceUnpublishByServer",
            EndReason::ForceDisconnectByServer => "forceDisconnectByServer",
            EndReason::SessionClosedByServer => "sessionClosedByServer",
            EndReason::LastParticipantLeft => "lastParticipantLeft",
            EndReason::MediaServerDisconnect => "mediaServerDisconnect",
            EndReason::EndpointFailure => "endpointFailure",
        }
    }
}

// ============================================================================
// REST API Models
// ============================================================================

/// Generic paged list body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub number_of_elements: usize,
    pub content: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(content: Vec<T>) -> Self {
        Self {
            number_of_elements: content.len(),
            content,
        }
    }
}

/// Request body for `POST /api/sessions`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub media_mode: Option<String>,
    pub recording_mode: Option<String>,
    pub default_output_mode: Option<String>,
    pub default_recording_layout: Option<String>,
    pub default_custom_layout: Option<String>,
    pub custom_session_id: Option<String>,
}

impl CreateSessionRequest {
    /// Resolve wire strings into typed properties, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns `SfuError::BadRequest` when an enum field has an unknown value.
    pub fn into_properties(self) -> Result<SessionProperties, SfuError> {
        let mut props = SessionProperties::default();
        if let Some(v) = self.media_mode.as_deref() {
            props.media_mode = parse_wire_enum("mediaMode", v)?;
        }
        if let Some(v) = self.recording_mode.as_deref() {
            props.recording_mode = parse_wire_enum("recordingMode", v)?;
        }
        if let Some(v) = self.default_output_mode.as_deref() {
            props.default_output_mode = parse_wire_enum("defaultOutputMode", v)?;
        }
        if let Some(v) = self.default_recording_layout.as_deref() {
            props.default_recording_layout = parse_wire_enum("defaultRecordingLayout", v)?;
        }
        props.default_custom_layout = self.default_custom_layout.unwrap_or_default();
        props.custom_session_id = self.custom_session_id.filter(|id| !id.is_empty());
        Ok(props)
    }
}

/// Response body for `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedResponse {
    pub id: String,
    pub created_at: i64,
}

/// Session description returned by the sessions API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: i64,
    pub media_mode: MediaMode,
    pub recording_mode: RecordingMode,
    pub default_output_mode: OutputMode,
    pub default_recording_layout: RecordingLayout,
    pub default_custom_layout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_session_id: Option<String>,
    pub recording: bool,
    pub connections: ListResponse<ParticipantInfo>,
}

/// Participant description nested in `SessionInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub connection_id: String,
    pub created_at: i64,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: String,
    pub client_data: String,
    pub server_data: String,
    pub publishers: Vec<PublisherInfo>,
    pub subscribers: Vec<String>,
}

/// Published stream description nested in `ParticipantInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherInfo {
    pub stream_id: String,
    pub created_at: i64,
    pub media_options: MediaOptions,
}

/// Request body for `POST /api/tokens`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub session: Option<String>,
    pub role: Option<String>,
    pub data: Option<String>,
    pub kurento_options: Option<TokenOptions>,
}

/// Response body for `POST /api/tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub id: String,
    pub session: String,
    pub role: Role,
    pub data: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kurento_options: Option<TokenOptions>,
}

/// Request body for `POST /api/signal`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub session: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: String,
}

/// Request body for `POST /api/sessions/{id}/connection`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFeedRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub rtsp_uri: Option<String>,
    #[serde(rename = "adaptativeBitrate")]
    pub adaptive_bitrate: Option<bool>,
    pub only_play_with_subscribers: Option<bool>,
    pub network_cache: Option<u32>,
    pub data: Option<String>,
}

/// Request body for `POST /api/recordings/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    pub session: Option<String>,
    pub name: Option<String>,
    pub output_mode: Option<String>,
    pub recording_layout: Option<String>,
    pub custom_layout: Option<String>,
    pub has_audio: Option<bool>,
    pub has_video: Option<bool>,
}

/// Parameters for a session recording once defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingProperties {
    pub name: String,
    pub output_mode: OutputMode,
    pub recording_layout: RecordingLayout,
    pub custom_layout: String,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Recording description returned by the recordings API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub output_mode: OutputMode,
    pub has_audio: bool,
    pub has_video: bool,
    pub status: String,
    pub created_at: i64,
}

/// Media node entry returned by `GET /api/media-nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaNodeInfo {
    pub id: String,
    pub uri: String,
    pub connected: bool,
    pub status: String,
    pub load: f64,
    pub sessions: usize,
}

/// Server configuration returned by `GET /api/config`. Node URIs are
/// reduced to a count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigInfo {
    pub version: String,
    pub public_url: String,
    pub media_nodes: usize,
    pub recording: bool,
    pub cdr: bool,
    pub empty_session_policy: String,
    pub endpoint_timeout_seconds: u64,
}
