//! A participant of a session.

use crate::endpoint::{EndpointContext, EndpointOrchestrator};
use crate::models::{MediaOptions, ParticipantInfo, Role, TokenOptions};
use common::types::{ParticipantPrivateId, ParticipantPublicId, SessionId};
use std::sync::Arc;

pub struct Participant {
    public_id: ParticipantPublicId,
    private_id: ParticipantPrivateId,
    session_id: SessionId,
    role: Role,
    client_data: String,
    server_data: String,
    token_options: Option<TokenOptions>,
    created_at_ms: i64,
    external_feed: bool,
    orchestrator: EndpointOrchestrator,
}

impl Participant {
    /// A browser participant. Publisher-capable roles get a publisher slot
    /// with default media options.
    pub fn new(
        ctx: Arc<EndpointContext>,
        session_id: SessionId,
        role: Role,
        client_data: String,
        server_data: String,
        token_options: Option<TokenOptions>,
    ) -> Self {
        let publisher_options = role
            .is_publisher_capable()
            .then(MediaOptions::default);
        Self::build(
            ctx,
            session_id,
            ParticipantPublicId::generate(),
            role,
            client_data,
            server_data,
            token_options,
            publisher_options,
        )
    }

    /// A server-side participant publishing an external feed.
    pub fn external_feed(
        ctx: Arc<EndpointContext>,
        session_id: SessionId,
        server_data: String,
        media_options: MediaOptions,
    ) -> Self {
        Self::build(
            ctx,
            session_id,
            ParticipantPublicId::generate_external_feed(),
            Role::Publisher,
            String::new(),
            server_data,
            None,
            Some(media_options),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        ctx: Arc<EndpointContext>,
        session_id: SessionId,
        public_id: ParticipantPublicId,
        role: Role,
        client_data: String,
        server_data: String,
        token_options: Option<TokenOptions>,
        publisher_options: Option<MediaOptions>,
    ) -> Self {
        let private_id = ParticipantPrivateId::generate();
        let external_feed = publisher_options
            .as_ref()
            .is_some_and(MediaOptions::is_external_feed);
        let orchestrator = EndpointOrchestrator::new(
            ctx,
            session_id.clone(),
            public_id.clone(),
            private_id.clone(),
            publisher_options,
        );
        Self {
            public_id,
            private_id,
            session_id,
            role,
            client_data,
            server_data,
            token_options,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            external_feed,
            orchestrator,
        }
    }

    pub fn public_id(&self) -> &ParticipantPublicId {
        &self.public_id
    }

    pub fn private_id(&self) -> &ParticipantPrivateId {
        &self.private_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn client_data(&self) -> &str {
        &self.client_data
    }

    pub fn server_data(&self) -> &str {
        &self.server_data
    }

    pub fn token_options(&self) -> Option<&TokenOptions> {
        self.token_options.as_ref()
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn is_external_feed(&self) -> bool {
        self.external_feed
    }

    pub fn is_streaming(&self) -> bool {
        self.orchestrator.is_streaming()
    }

    pub fn orchestrator(&self) -> &EndpointOrchestrator {
        &self.orchestrator
    }

    pub fn to_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            connection_id: self.public_id.to_string(),
            created_at: self.created_at_ms,
            role: self.role,
            kind: if self.external_feed { "IPCAM" } else { "WEBRTC" }.to_string(),
            client_data: self.client_data.clone(),
            server_data: self.server_data.clone(),
            publishers: self.orchestrator.publisher_info().into_iter().collect(),
            subscribers: self
                .orchestrator
                .subscribed_streams()
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
