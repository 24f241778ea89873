//! External collaborators.
//!
//! The control plane depends on four services it does not implement:
//!
//! - `token` - Token issuance ([`TokenIssuer`])
//! - `recording` - Recording orchestration ([`RecordingCoordinator`])
//! - `cdr` - Call-detail records ([`CdrSink`])
//! - `signaling` - Delivery of messages to connected clients ([`SignalingTransport`])
//!
//! Each module provides a default implementation used by the binary and a
//! `mock` submodule used by tests.

pub mod cdr;
pub mod recording;
pub mod signaling;
pub mod token;

pub use cdr::{CdrError, CdrEvent, CdrSink, LoggingCdrSink, NoopCdrSink};
pub use recording::{NoopRecordingCoordinator, RecordingCoordinator, RecordingError};
pub use signaling::{LoggingSignalingTransport, SessionNotification, SignalingTransport};
pub use token::{DefaultTokenIssuer, Token, TokenIssuer};

use crate::config::Config;
use std::sync::Arc;

/// Public id of the server-side participant that records sessions.
pub const RECORDER_PARTICIPANT_PUBLIC_ID: &str = "RECORDER";

/// The full set of collaborators handed to the session manager.
#[derive(Clone)]
pub struct Collaborators {
    pub token_issuer: Arc<dyn TokenIssuer>,
    pub recording: Arc<dyn RecordingCoordinator>,
    pub cdr: Arc<dyn CdrSink>,
    pub signaling: Arc<dyn SignalingTransport>,
}

impl Collaborators {
    /// Collaborators used by the binary. Recording is disabled and CDRs
    /// follow `cdr_enabled`.
    pub fn from_config(config: &Config) -> Self {
        let cdr: Arc<dyn CdrSink> = if config.cdr_enabled {
            Arc::new(LoggingCdrSink)
        } else {
            Arc::new(NoopCdrSink)
        };
        Self {
            token_issuer: Arc::new(DefaultTokenIssuer::new(
                config.ws_url.as_str(),
                env!("CARGO_PKG_VERSION"),
            )),
            recording: Arc::new(NoopRecordingCoordinator),
            cdr,
            signaling: Arc::new(LoggingSignalingTransport),
        }
    }
}
