//! Outbound signaling to connected clients.
//!
//! The wire protocol between clients and the controller is handled elsewhere;
//! this trait is the seam through which the control plane pushes
//! asynchronous events (ICE candidates, media errors, membership changes).

use crate::models::{EndReason, IceCandidate};
use common::types::{ParticipantPrivateId, ParticipantPublicId, SessionId, StreamId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    ParticipantJoined {
        participant: ParticipantPublicId,
        client_data: String,
    },
    ParticipantLeft {
        participant: ParticipantPublicId,
        reason: EndReason,
    },
    ParticipantEvicted {
        participant: ParticipantPublicId,
        reason: EndReason,
    },
    StreamPublished {
        participant: ParticipantPublicId,
        stream: StreamId,
    },
    StreamUnpublished {
        participant: ParticipantPublicId,
        stream: StreamId,
        reason: EndReason,
    },
    SessionClosed {
        reason: EndReason,
    },
    Signal {
        from: Option<ParticipantPublicId>,
        kind: String,
        data: String,
    },
}

impl SessionNotification {
    pub fn method(&self) -> &'static str {
        match self {
            SessionNotification::ParticipantJoined { .. } => "participantJoined",
            SessionNotification::ParticipantLeft { .. } => "participantLeft",
            SessionNotification::ParticipantEvicted { .. } => "participantEvicted",
            SessionNotification::StreamPublished { .. } => "participantPublished",
            SessionNotification::StreamUnpublished { .. } => "participantUnpublished",
            SessionNotification::SessionClosed { .. } => "sessionClosed",
            SessionNotification::Signal { .. } => "signal",
        }
    }
}

/// Delivery is fire-and-forget; implementations must not block.
pub trait SignalingTransport: Send + Sync {
    fn send_ice_candidate(
        &self,
        session: &SessionId,
        recipient: &ParticipantPrivateId,
        endpoint_name: &str,
        candidate: &IceCandidate,
    );

    fn send_media_error(
        &self,
        session: &SessionId,
        recipient: &ParticipantPrivateId,
        description: &str,
    );

    fn notify(
        &self,
        session: &SessionId,
        recipients: &[ParticipantPrivateId],
        notification: &SessionNotification,
    );
}

/// Transport that only logs. Used when no signaling server is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSignalingTransport;

impl SignalingTransport for LoggingSignalingTransport {
    fn send_ice_candidate(
        &self,
        session: &SessionId,
        recipient: &ParticipantPrivateId,
        endpoint_name: &str,
        candidate: &IceCandidate,
    ) {
        tracing::trace!(
            target: "sfu.signaling",
            session_id = %session,
            recipient = %recipient,
            endpoint = endpoint_name,
            candidate = %candidate.candidate,
            "iceCandidate"
        );
    }

    fn send_media_error(
        &self,
        session: &SessionId,
        recipient: &ParticipantPrivateId,
        description: &str,
    ) {
        tracing::warn!(
            target: "sfu.signaling",
            session_id = %session,
            recipient = %recipient,
            error = description,
            "mediaError"
        );
    }

    fn notify(
        &self,
        session: &SessionId,
        recipients: &[ParticipantPrivateId],
        notification: &SessionNotification,
    ) {
        tracing::debug!(
            target: "sfu.signaling",
            session_id = %session,
            recipients = recipients.len(),
            method = notification.method(),
            "Notification"
        );
    }
}

pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Captured {
        IceCandidate {
            recipient: ParticipantPrivateId,
            endpoint_name: String,
            candidate: IceCandidate,
        },
        MediaError {
            recipient: ParticipantPrivateId,
            description: String,
        },
        Notification {
            recipients: Vec<ParticipantPrivateId>,
            notification: SessionNotification,
        },
    }

    /// Records every outbound message.
    #[derive(Default)]
    pub struct CapturingSignalingTransport {
        sent: Mutex<Vec<Captured>>,
    }

    impl CapturingSignalingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<Captured> {
            self.sent.lock().clone()
        }

        pub fn ice_candidates_for(&self, endpoint_name: &str) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|c| {
                    matches!(c, Captured::IceCandidate { endpoint_name: n, .. } if n == endpoint_name)
                })
                .count()
        }

        pub fn media_errors(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Captured::MediaError { description, .. } => Some(description.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn notifications(&self, method: &str) -> Vec<SessionNotification> {
            self.sent
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Captured::Notification { notification, .. }
                        if notification.method() == method =>
                    {
                        Some(notification.clone())
                    }
                    _ => None,
                })
                .collect()
        }
    }

    impl SignalingTransport for CapturingSignalingTransport {
        fn send_ice_candidate(
            &self,
            _session: &SessionId,
            recipient: &ParticipantPrivateId,
            endpoint_name: &str,
            candidate: &IceCandidate,
        ) {
            self.sent.lock().push(Captured::IceCandidate {
                recipient: recipient.clone(),
                endpoint_name: endpoint_name.to_string(),
                candidate: candidate.clone(),
            });
        }

        fn send_media_error(
            &self,
            _session: &SessionId,
            recipient: &ParticipantPrivateId,
            description: &str,
        ) {
            self.sent.lock().push(Captured::MediaError {
                recipient: recipient.clone(),
                description: description.to_string(),
            });
        }

        fn notify(
            &self,
            _session: &SessionId,
            recipients: &[ParticipantPrivateId],
            notification: &SessionNotification,
        ) {
            self.sent.lock().push(Captured::Notification {
                recipients: recipients.to_vec(),
                notification: notification.clone(),
            });
        }
    }
}
