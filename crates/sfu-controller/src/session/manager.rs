//! Session manager.
//!
//! Entry point for every client and administrative operation. Looks up the
//! session and participant, enforces admission and permissions, delegates to
//! the participant's endpoint orchestrator and notifies other participants.

use super::participant::Participant;
use super::registry::SessionRegistry;
use super::room::RoomSession;
use crate::cluster::NodeCluster;
use crate::collaborators::{
    Collaborators, RecordingCoordinator, RecordingError, SessionNotification,
    SignalingTransport, Token, TokenIssuer,
};
use crate::config::{Config, EmptySessionPolicy};
use crate::endpoint::EndpointContext;
use crate::errors::SfuError;
use crate::media::ErrorClassifier;
use crate::models::{
    parse_wire_enum, EndReason, ExternalFeedRequest, IceCandidate, MediaMode, MediaNodeInfo,
    MediaOptions, ParticipantInfo, RecordingInfo, RecordingMode, RecordingProperties, Role,
    SessionInfo, SessionProperties, SignalRequest, StartRecordingRequest, TokenOptions,
};
use common::types::{NodeId, ParticipantPrivateId, ParticipantPublicId, SessionId, StreamId};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Settings of the session manager taken from [`Config`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub empty_session_policy: EmptySessionPolicy,
    pub recording_enabled: bool,
    pub endpoint_timeout: Duration,
    pub benign_error_codes: Vec<i64>,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            empty_session_policy: config.empty_session_policy,
            recording_enabled: config.recording_enabled,
            endpoint_timeout: config.endpoint_timeout(),
            benign_error_codes: config.benign_error_codes.clone(),
        }
    }
}

/// Credentials a client presents to join a session.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub token: String,
    pub client_data: String,
}

pub struct SessionManager {
    registry: SessionRegistry,
    cluster: Arc<NodeCluster>,
    ctx: Arc<EndpointContext>,
    classifier: ErrorClassifier,
    token_issuer: Arc<dyn TokenIssuer>,
    signaling: Arc<dyn SignalingTransport>,
    recording: Arc<dyn RecordingCoordinator>,
    /// Session recordings started through this manager.
    recordings: DashMap<SessionId, String>,
    settings: ManagerSettings,
}

/// `scheme://rest` with an RFC 3986 scheme.
fn is_valid_feed_uri(uri: &str) -> bool {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
        && !rest.is_empty()
}

fn map_recording_error(e: RecordingError) -> SfuError {
    match e {
        RecordingError::Disabled => SfuError::NotImplemented("recording is disabled".to_string()),
        RecordingError::NotFound(id) => SfuError::RecordingNotFound(id),
        RecordingError::AlreadyRecording(id) => {
            SfuError::Conflict(format!("session {id} is already being recorded"))
        }
        RecordingError::Starting(id) => {
            SfuError::NotAcceptable(format!("recording {id} is still starting"))
        }
        RecordingError::Failed(detail) => SfuError::Internal(detail),
    }
}

impl SessionManager {
    pub fn new(
        cluster: Arc<NodeCluster>,
        collaborators: Collaborators,
        settings: ManagerSettings,
    ) -> Self {
        let classifier = ErrorClassifier::new(settings.benign_error_codes.iter().copied());
        let ctx = Arc::new(EndpointContext {
            signaling: Arc::clone(&collaborators.signaling),
            cdr: Arc::clone(&collaborators.cdr),
            recording: Arc::clone(&collaborators.recording),
            classifier: classifier.clone(),
            endpoint_timeout: settings.endpoint_timeout,
        });
        Self {
            registry: SessionRegistry::new(),
            cluster,
            ctx,
            classifier,
            token_issuer: collaborators.token_issuer,
            signaling: collaborators.signaling,
            recording: collaborators.recording,
            recordings: DashMap::new(),
            settings,
        }
    }

    pub fn cluster(&self) -> &Arc<NodeCluster> {
        &self.cluster
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// `BadRequest` for a malformed custom id, `Conflict` if the id is taken.
    #[instrument(skip_all, name = "sfu.session.create")]
    pub fn create_session(
        &self,
        properties: SessionProperties,
    ) -> Result<Arc<RoomSession>, SfuError> {
        let id = match properties.custom_session_id.as_deref() {
            Some(custom) => SessionId::custom(custom).map_err(|e| {
                SfuError::BadRequest(format!("customSessionId must match [A-Za-z0-9_-]+: {e}"))
            })?,
            None => SessionId::generate(),
        };
        let session = Arc::new(RoomSession::new(
            id,
            properties,
            Arc::clone(&self.cluster),
            self.classifier.clone(),
        ));
        self.registry.insert(Arc::clone(&session))?;
        info!(target: "sfu.session", session_id = %session.id(), "Session created");
        Ok(session)
    }

    /// # Errors
    ///
    /// `SessionNotFound` if no such session exists.
    pub fn session(&self, id: &SessionId) -> Result<Arc<RoomSession>, SfuError> {
        self.registry
            .get_any(id)
            .ok_or_else(|| SfuError::SessionNotFound(id.to_string()))
    }

    pub fn sessions(&self) -> Vec<Arc<RoomSession>> {
        self.registry.list()
    }

    pub fn session_info(&self, session: &RoomSession) -> SessionInfo {
        session.to_info(self.recording.session_is_being_recorded(session.id()))
    }

    /// Close a session and drop it from the registry.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if it does not exist or is already closed.
    #[instrument(skip_all, name = "sfu.session.close_session", fields(session_id = %id))]
    pub async fn close_session(&self, id: &SessionId, reason: EndReason) -> Result<(), SfuError> {
        let session = self.session(id)?;
        self.destroy(&session, reason).await
    }

    async fn destroy(&self, session: &Arc<RoomSession>, reason: EndReason) -> Result<(), SfuError> {
        let recipients = session.private_ids();
        if !session.close(reason).await {
            return Err(SfuError::SessionNotFound(session.id().to_string()));
        }
        self.forget_closed(session, reason, &recipients).await;
        Ok(())
    }

    async fn forget_closed(
        &self,
        session: &RoomSession,
        reason: EndReason,
        recipients: &[ParticipantPrivateId],
    ) {
        self.registry.remove(session.id());
        self.stop_session_recording_for(session.id(), "sessionClosedByServer")
            .await;
        self.signaling.notify(
            session.id(),
            recipients,
            &SessionNotification::SessionClosed { reason },
        );
    }

    // ------------------------------------------------------------------
    // Tokens and participants
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// `SessionNotFound` for unknown sessions, `SessionClosing` once close
    /// has begun.
    #[instrument(skip_all, name = "sfu.session.issue_token", fields(session_id = %session_id, role = role.as_str()))]
    pub fn issue_token(
        &self,
        session_id: &SessionId,
        role: Role,
        server_data: &str,
        options: Option<TokenOptions>,
    ) -> Result<Token, SfuError> {
        let session = self.session(session_id)?;
        let _admission = session.try_admit()?;
        let token = self
            .token_issuer
            .issue(session_id, role, server_data, options);
        session.add_token(token.clone());
        Ok(token)
    }

    /// Admit a client holding a token.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `SessionClosing`, `InvalidToken`, or pipeline
    /// errors for routed sessions.
    #[instrument(skip_all, name = "sfu.session.join", fields(session_id = %session_id))]
    pub async fn join_participant(
        &self,
        session_id: &SessionId,
        request: JoinRequest,
    ) -> Result<Arc<Participant>, SfuError> {
        let session = self.session(session_id)?;
        let _admission = session.try_admit()?;
        let token = session
            .consume_token(&request.token)
            .ok_or_else(|| SfuError::InvalidToken("token not issued for this session".to_string()))?;

        if session.properties().media_mode == MediaMode::Routed {
            if let Err(e) = session.ensure_pipeline().await {
                session.add_token(token);
                return Err(e);
            }
        }

        let participant = Arc::new(Participant::new(
            Arc::clone(&self.ctx),
            session_id.clone(),
            token.role,
            request.client_data,
            token.server_data.clone(),
            token.options.clone(),
        ));
        let others: Vec<Arc<Participant>> = session.participants();
        session.add_participant(Arc::clone(&participant));
        if session.mark_active() {
            self.registry.activate(&session);
        }

        for other in others.iter().filter(|o| o.role().is_publisher_capable()) {
            participant
                .orchestrator()
                .get_or_create_subscriber(other.public_id());
        }

        let recipients: Vec<ParticipantPrivateId> =
            others.iter().map(|o| o.private_id().clone()).collect();
        self.signaling.notify(
            session_id,
            &recipients,
            &SessionNotification::ParticipantJoined {
                participant: participant.public_id().clone(),
                client_data: participant.client_data().to_string(),
            },
        );
        info!(
            target: "sfu.session",
            participant = %participant.public_id(),
            role = participant.role().as_str(),
            "Participant joined"
        );
        Ok(participant)
    }

    /// # Errors
    ///
    /// `SessionNotFound` or `ParticipantNotFound`.
    #[instrument(skip_all, name = "sfu.session.leave", fields(session_id = %session_id))]
    pub async fn leave_participant(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        reason: EndReason,
    ) -> Result<(), SfuError> {
        let session = self.session(session_id)?;
        let participant = session
            .remove_participant(private_id)
            .ok_or_else(|| SfuError::ParticipantNotFound(private_id.to_string()))?;
        self.detach_participant(&session, &participant, reason)
            .await;
        self.signaling.notify(
            session_id,
            &session.private_ids(),
            &SessionNotification::ParticipantLeft {
                participant: participant.public_id().clone(),
                reason,
            },
        );
        self.apply_empty_session_policy(&session).await;
        Ok(())
    }

    /// Force a participant out of a session.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `ParticipantNotFound`.
    #[instrument(skip_all, name = "sfu.session.evict", fields(session_id = %session_id, participant = %public_id))]
    pub async fn evict_participant(
        &self,
        session_id: &SessionId,
        public_id: &ParticipantPublicId,
    ) -> Result<(), SfuError> {
        let session = self.session(session_id)?;
        let participant = session
            .participant_by_public_id(public_id)
            .ok_or_else(|| SfuError::ParticipantNotFound(public_id.to_string()))?;
        let recipients = session.private_ids();
        if session.remove_participant(participant.private_id()).is_none() {
            return Err(SfuError::ParticipantNotFound(public_id.to_string()));
        }
        let reason = EndReason::ForceDisconnectByServer;
        self.detach_participant(&session, &participant, reason)
            .await;
        self.signaling.notify(
            session_id,
            &recipients,
            &SessionNotification::ParticipantEvicted {
                participant: public_id.clone(),
                reason,
            },
        );
        self.apply_empty_session_policy(&session).await;
        Ok(())
    }

    async fn detach_participant(
        &self,
        session: &RoomSession,
        participant: &Participant,
        reason: EndReason,
    ) {
        self.cancel_subscriptions_to(session, participant.public_id(), reason)
            .await;
        participant.orchestrator().close(session, reason).await;
    }

    async fn cancel_subscriptions_to(
        &self,
        session: &RoomSession,
        publisher: &ParticipantPublicId,
        reason: EndReason,
    ) {
        for other in session.participants() {
            if other.orchestrator().subscriber(publisher).is_some() {
                other
                    .orchestrator()
                    .cancel_subscription(publisher, reason, false)
                    .await;
            }
        }
    }

    async fn apply_empty_session_policy(&self, session: &Arc<RoomSession>) {
        if session.participant_count() > 0 || session.is_closed() {
            return;
        }
        match self.settings.empty_session_policy {
            EmptySessionPolicy::Destroy => {
                let reason = EndReason::LastParticipantLeft;
                if session.close_if_empty(reason).await {
                    self.forget_closed(session, reason, &[]).await;
                }
            }
            EmptySessionPolicy::Recycle => {
                session
                    .recycle_if_empty(|| self.registry.deactivate(session))
                    .await;
            }
        }
    }

    // ------------------------------------------------------------------
    // External feeds
    // ------------------------------------------------------------------

    /// Add a server-side participant that publishes an external feed.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a missing or malformed URI, `SessionNotFound`,
    /// `SessionClosing`, or endpoint errors.
    #[instrument(skip_all, name = "sfu.session.publish_external_feed", fields(session_id = %session_id))]
    pub async fn publish_external_feed(
        &self,
        session_id: &SessionId,
        request: ExternalFeedRequest,
    ) -> Result<ParticipantInfo, SfuError> {
        let uri = request
            .rtsp_uri
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SfuError::BadRequest("rtspUri is mandatory".to_string()))?;
        if !is_valid_feed_uri(&uri) {
            return Err(SfuError::BadRequest(format!("rtspUri is not a valid URI: {uri}")));
        }

        let session = self.session(session_id)?;
        let _admission = session.try_admit()?;

        let options = MediaOptions {
            type_of_video: Some(request.kind.unwrap_or_else(|| "IPCAM".to_string())),
            rtsp_uri: Some(uri),
            adaptive_bitrate: request.adaptive_bitrate.unwrap_or(true),
            only_play_with_subscribers: request.only_play_with_subscribers.unwrap_or(true),
            network_cache: request.network_cache,
            ..MediaOptions::default()
        };
        let participant = Arc::new(Participant::external_feed(
            Arc::clone(&self.ctx),
            session_id.clone(),
            request.data.unwrap_or_default(),
            options,
        ));
        let others = session.private_ids();
        session.add_participant(Arc::clone(&participant));
        if session.mark_active() {
            self.registry.activate(&session);
        }

        let stream_id = match participant.orchestrator().publish_external_feed(&session).await {
            Ok(stream_id) => stream_id,
            Err(e) => {
                session.remove_participant(participant.private_id());
                participant
                    .orchestrator()
                    .close(&session, EndReason::EndpointFailure)
                    .await;
                return Err(e);
            }
        };

        self.signaling.notify(
            session_id,
            &others,
            &SessionNotification::ParticipantJoined {
                participant: participant.public_id().clone(),
                client_data: String::new(),
            },
        );
        self.signaling.notify(
            session_id,
            &others,
            &SessionNotification::StreamPublished {
                participant: participant.public_id().clone(),
                stream: stream_id,
            },
        );
        self.maybe_start_automatic_recording(&session).await;
        Ok(participant.to_info())
    }

    /// Force-unpublish a stream.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`; `StreamNotFound` if the session is not active or
    /// the stream is unknown; `NotAllowed` for external feeds.
    #[instrument(skip_all, name = "sfu.session.unpublish_stream", fields(session_id = %session_id, stream_id = %stream_id))]
    pub async fn unpublish_stream(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
    ) -> Result<(), SfuError> {
        let session = self.session(session_id)?;
        if !self.registry.is_active(session_id) {
            return Err(SfuError::StreamNotFound(stream_id.to_string()));
        }
        let participant = session
            .stream_owner(stream_id)
            .and_then(|owner| session.participant(&owner))
            .ok_or_else(|| SfuError::StreamNotFound(stream_id.to_string()))?;
        if participant.is_external_feed() {
            return Err(SfuError::NotAllowed(
                "external feeds are removed by deleting their connection".to_string(),
            ));
        }
        self.unpublish_participant(&session, &participant, EndReason::ForceUnpublishByServer)
            .await;
        Ok(())
    }

    async fn unpublish_participant(
        &self,
        session: &RoomSession,
        participant: &Participant,
        reason: EndReason,
    ) {
        self.cancel_subscriptions_to(session, participant.public_id(), reason)
            .await;
        if let Some(stream) = participant.orchestrator().unpublish(session, reason).await {
            self.signaling.notify(
                session.id(),
                &session.private_ids(),
                &SessionNotification::StreamUnpublished {
                    participant: participant.public_id().clone(),
                    stream,
                    reason,
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // Media operations
    // ------------------------------------------------------------------

    fn participant_of(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
    ) -> Result<(Arc<RoomSession>, Arc<Participant>), SfuError> {
        let session = self.session(session_id)?;
        let participant = session
            .participant(private_id)
            .ok_or_else(|| SfuError::ParticipantNotFound(private_id.to_string()))?;
        Ok((session, participant))
    }

    /// # Errors
    ///
    /// `Forbidden` for roles that may not publish, plus endpoint errors.
    pub async fn create_publisher(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        media_options: MediaOptions,
        desired_stream_id: Option<StreamId>,
    ) -> Result<StreamId, SfuError> {
        let (session, participant) = self.participant_of(session_id, private_id)?;
        participant
            .orchestrator()
            .create_publisher(&session, media_options, desired_stream_id)
            .await
    }

    /// Returns the SDP answer.
    ///
    /// # Errors
    ///
    /// See [`crate::endpoint::EndpointOrchestrator::publish`].
    pub async fn publish(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        sdp_offer: &str,
        loopback: bool,
    ) -> Result<String, SfuError> {
        let (session, participant) = self.participant_of(session_id, private_id)?;
        let was_streaming = participant.is_streaming();
        let answer = participant
            .orchestrator()
            .publish(&session, sdp_offer, loopback, false)
            .await?;

        if !was_streaming {
            if let Some(stream) = participant.orchestrator().stream_id() {
                let others: Vec<ParticipantPrivateId> = session
                    .private_ids()
                    .into_iter()
                    .filter(|id| id != private_id)
                    .collect();
                self.signaling.notify(
                    session_id,
                    &others,
                    &SessionNotification::StreamPublished {
                        participant: participant.public_id().clone(),
                        stream,
                    },
                );
            }
            self.maybe_start_automatic_recording(&session).await;
        }
        Ok(answer)
    }

    /// # Errors
    ///
    /// `SessionNotFound` or `ParticipantNotFound`.
    pub async fn unpublish(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
    ) -> Result<(), SfuError> {
        let (session, participant) = self.participant_of(session_id, private_id)?;
        self.unpublish_participant(&session, &participant, EndReason::Unpublish)
            .await;
        Ok(())
    }

    /// Returns the SDP answer, or `None` if a concurrent operation made the
    /// call redundant.
    ///
    /// # Errors
    ///
    /// `LoopbackNotAllowed`, `ParticipantNotFound` for an unknown remote,
    /// `RemoteNotPublishing`, plus endpoint errors.
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        remote: &ParticipantPublicId,
        sdp_offer: &str,
    ) -> Result<Option<String>, SfuError> {
        let (session, participant) = self.participant_of(session_id, private_id)?;
        if participant.public_id() == remote {
            return Err(SfuError::LoopbackNotAllowed);
        }
        let sender = session
            .participant_by_public_id(remote)
            .ok_or_else(|| SfuError::ParticipantNotFound(remote.to_string()))?;
        participant
            .orchestrator()
            .subscribe(sender.orchestrator(), sdp_offer, false)
            .await
    }

    /// Returns `false` if there was no such subscription.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `ParticipantNotFound`.
    pub async fn cancel_subscription(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        remote: &ParticipantPublicId,
    ) -> Result<bool, SfuError> {
        let (_, participant) = self.participant_of(session_id, private_id)?;
        Ok(participant
            .orchestrator()
            .cancel_subscription(remote, EndReason::Unsubscribe, false)
            .await)
    }

    /// # Errors
    ///
    /// `SessionNotFound`, `ParticipantNotFound`, or `MediaNegotiation`.
    pub async fn add_ice_candidate(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        endpoint_name: &str,
        candidate: IceCandidate,
    ) -> Result<(), SfuError> {
        let (_, participant) = self.participant_of(session_id, private_id)?;
        participant
            .orchestrator()
            .add_ice_candidate(endpoint_name, candidate)
            .await
    }

    /// # Errors
    ///
    /// `Forbidden` if the participant's token does not allow `filter_type`,
    /// `StreamNotFound` if it is not streaming.
    pub async fn attach_filter(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        filter_type: &str,
        options: Value,
    ) -> Result<String, SfuError> {
        let (_, participant) = self.participant_of(session_id, private_id)?;
        let allowed = participant
            .token_options()
            .is_some_and(|o| o.allows_filter(filter_type));
        if !allowed {
            return Err(SfuError::Forbidden(format!(
                "filter {filter_type} is not allowed for this participant"
            )));
        }
        participant
            .orchestrator()
            .attach_filter(filter_type, options)
            .await
    }

    /// Returns `false` if the filter was already gone.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `ParticipantNotFound`.
    pub async fn detach_filter(
        &self,
        session_id: &SessionId,
        private_id: &ParticipantPrivateId,
        filter_id: &str,
    ) -> Result<bool, SfuError> {
        let (_, participant) = self.participant_of(session_id, private_id)?;
        Ok(participant.orchestrator().detach_filter(filter_id).await)
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Send an application signal to some or all participants.
    ///
    /// # Errors
    ///
    /// `BadRequest` without a session, `SessionNotFound`, and
    /// `NotAcceptable` for inactive sessions or unknown recipients.
    pub fn send_signal(&self, request: SignalRequest) -> Result<(), SfuError> {
        let session_id = request
            .session
            .map(SessionId::new)
            .ok_or_else(|| SfuError::BadRequest("session is mandatory".to_string()))?;
        let session = self.session(&session_id)?;
        if !self.registry.is_active(&session_id) {
            return Err(SfuError::NotAcceptable(format!(
                "session {session_id} has no participants"
            )));
        }

        let recipients: Vec<ParticipantPrivateId> = if request.to.is_empty() {
            session.private_ids()
        } else {
            request
                .to
                .iter()
                .map(|public| {
                    session
                        .participant_by_public_id(&ParticipantPublicId::new(public.as_str()))
                        .map(|p| p.private_id().clone())
                        .ok_or_else(|| {
                            SfuError::NotAcceptable(format!("connection {public} not found"))
                        })
                })
                .collect::<Result<_, _>>()?
        };

        self.signaling.notify(
            &session_id,
            &recipients,
            &SessionNotification::Signal {
                from: None,
                kind: request.kind,
                data: request.data,
            },
        );
        Ok(())
    }

    /// # Errors
    ///
    /// `NotImplemented` when recording is disabled; `SessionNotFound`;
    /// `Conflict` if the session is not routed or already recorded;
    /// `NotAcceptable` if it has no participants.
    #[instrument(skip_all, name = "sfu.session.start_recording")]
    pub async fn start_recording(
        &self,
        request: StartRecordingRequest,
    ) -> Result<RecordingInfo, SfuError> {
        if !self.settings.recording_enabled {
            return Err(SfuError::NotImplemented("recording is disabled".to_string()));
        }
        let session_id = request
            .session
            .clone()
            .map(SessionId::new)
            .ok_or_else(|| SfuError::BadRequest("session is mandatory".to_string()))?;
        let session = self.session(&session_id)?;
        let defaults = session.properties();

        let properties = RecordingProperties {
            name: request.name.unwrap_or_default(),
            output_mode: match request.output_mode.as_deref() {
                Some(v) => parse_wire_enum("outputMode", v)?,
                None => defaults.default_output_mode,
            },
            recording_layout: match request.recording_layout.as_deref() {
                Some(v) => parse_wire_enum("recordingLayout", v)?,
                None => defaults.default_recording_layout,
            },
            custom_layout: request
                .custom_layout
                .unwrap_or_else(|| defaults.default_custom_layout.clone()),
            has_audio: request.has_audio.unwrap_or(true),
            has_video: request.has_video.unwrap_or(true),
        };
        if !properties.has_audio && !properties.has_video {
            return Err(SfuError::BadRequest(
                "hasAudio and hasVideo cannot both be false".to_string(),
            ));
        }
        if defaults.media_mode != MediaMode::Routed {
            return Err(SfuError::Conflict(format!(
                "session {session_id} is not ROUTED"
            )));
        }
        if self.recording.session_is_being_recorded(&session_id) {
            return Err(SfuError::Conflict(format!(
                "session {session_id} is already being recorded"
            )));
        }
        if session.participant_count() == 0 {
            return Err(SfuError::NotAcceptable(format!(
                "session {session_id} has no participants"
            )));
        }

        self.start_session_recording(&session, &properties).await
    }

    async fn start_session_recording(
        &self,
        session: &RoomSession,
        properties: &RecordingProperties,
    ) -> Result<RecordingInfo, SfuError> {
        let info = self
            .recording
            .start_session_recording(session.id(), properties)
            .await
            .map_err(map_recording_error)?;
        self.recordings
            .insert(session.id().clone(), info.id.clone());
        info!(target: "sfu.session", session_id = %session.id(), recording_id = %info.id, "Recording started");
        Ok(info)
    }

    /// # Errors
    ///
    /// `NotImplemented` when recording is disabled, `RecordingNotFound` for
    /// unknown recordings.
    #[instrument(skip_all, name = "sfu.session.stop_recording", fields(recording_id = %recording_id))]
    pub async fn stop_recording(&self, recording_id: &str) -> Result<RecordingInfo, SfuError> {
        if !self.settings.recording_enabled {
            return Err(SfuError::NotImplemented("recording is disabled".to_string()));
        }
        let info = self
            .recording
            .stop_session_recording(recording_id, "recordingStoppedByServer")
            .await
            .map_err(map_recording_error)?;
        self.recordings.retain(|_, id| id != recording_id);
        Ok(info)
    }

    async fn stop_session_recording_for(&self, session_id: &SessionId, reason: &str) {
        let Some((_, recording_id)) = self.recordings.remove(session_id) else {
            return;
        };
        if let Err(e) = self
            .recording
            .stop_session_recording(&recording_id, reason)
            .await
        {
            warn!(target: "sfu.session", session_id = %session_id, recording_id = %recording_id, error = %e, "Failed to stop session recording");
        }
    }

    /// Start recording an ALWAYS-recorded session on its first stream.
    async fn maybe_start_automatic_recording(&self, session: &RoomSession) {
        let properties = session.properties();
        if !self.settings.recording_enabled
            || properties.recording_mode != RecordingMode::Always
            || properties.media_mode != MediaMode::Routed
            || self.recording.session_is_being_recorded(session.id())
        {
            return;
        }
        let recording = RecordingProperties {
            name: String::new(),
            output_mode: properties.default_output_mode,
            recording_layout: properties.default_recording_layout,
            custom_layout: properties.default_custom_layout.clone(),
            has_audio: true,
            has_video: true,
        };
        if let Err(e) = self.start_session_recording(session, &recording).await {
            warn!(target: "sfu.session", session_id = %session.id(), error = %e, "Failed to start automatic recording");
        }
    }

    /// Nodes ordered by ascending load.
    pub fn node_load_ranking(&self) -> Vec<MediaNodeInfo> {
        self.cluster
            .load_ranking()
            .into_iter()
            .map(|(node, load)| MediaNodeInfo {
                id: node.id().to_string(),
                uri: node.uri().to_string(),
                connected: node.is_connected(),
                status: node.status().as_str().to_string(),
                load,
                sessions: node.session_count(),
            })
            .collect()
    }

    /// Bring sessions bound to a replaced media server instance back in
    /// line: lost streams stop, recordings are cut at the disconnection time
    /// and participants are told to publish again.
    #[instrument(skip_all, name = "sfu.session.resynchronize", fields(node_id = %node, sessions = sessions.len()))]
    pub async fn resynchronize_node_sessions(
        &self,
        node: &NodeId,
        sessions: &[SessionId],
        disconnected_at_ms: i64,
    ) {
        for session_id in sessions {
            let Some(session) = self.registry.get_any(session_id) else {
                continue;
            };
            for participant in session.participants() {
                participant
                    .orchestrator()
                    .handle_media_server_lost(&session, disconnected_at_ms)
                    .await;
            }
            info!(target: "sfu.session", session_id = %session_id, "Session resynchronized after media server replacement");
        }
    }
}
