//! Call-detail records.
//!
//! CDR delivery is best effort: a failing sink is logged and counted but never
//! fails the media operation that produced the record.

use crate::models::{EndReason, MediaOptions};
use crate::observability::metrics;
use common::types::{ParticipantPublicId, SessionId, StreamId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdrEvent {
    NewPublisher {
        session: SessionId,
        participant: ParticipantPublicId,
        stream: StreamId,
        media_options: MediaOptions,
        at_ms: i64,
    },
    StopPublisher {
        session: SessionId,
        participant: ParticipantPublicId,
        stream: StreamId,
        reason: EndReason,
        at_ms: i64,
    },
    NewSubscriber {
        session: SessionId,
        participant: ParticipantPublicId,
        sender: ParticipantPublicId,
        stream: StreamId,
        at_ms: i64,
    },
    StopSubscriber {
        session: SessionId,
        participant: ParticipantPublicId,
        sender: ParticipantPublicId,
        stream: StreamId,
        reason: EndReason,
        at_ms: i64,
    },
}

impl CdrEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CdrEvent::NewPublisher { .. } => "publisher_started",
            CdrEvent::StopPublisher { .. } => "publisher_stopped",
            CdrEvent::NewSubscriber { .. } => "subscriber_started",
            CdrEvent::StopSubscriber { .. } => "subscriber_stopped",
        }
    }
}

#[derive(Debug, Error)]
pub enum CdrError {
    #[error("CDR sink unavailable: {0}")]
    Unavailable(String),
}

pub trait CdrSink: Send + Sync {
    fn record(&self, event: &CdrEvent) -> Result<(), CdrError>;
}

/// Record an event, swallowing sink failures.
pub fn emit(sink: &dyn CdrSink, event: CdrEvent) {
    if let Err(e) = sink.record(&event) {
        metrics::record_cdr_failure(event.kind());
        tracing::warn!(target: "sfu.cdr", error = %e, event = event.kind(), "Failed to record CDR event");
    }
}

/// Writes CDR events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCdrSink;

impl CdrSink for LoggingCdrSink {
    fn record(&self, event: &CdrEvent) -> Result<(), CdrError> {
        tracing::info!(target: "sfu.cdr", event = event.kind(), detail = ?event, "CDR");
        Ok(())
    }
}

/// Drops every event; used when CDRs are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCdrSink;

impl CdrSink for NoopCdrSink {
    fn record(&self, _event: &CdrEvent) -> Result<(), CdrError> {
        Ok(())
    }
}

pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Captures CDR events; can be switched to fail every call.
    #[derive(Default)]
    pub struct RecordingCdrSink {
        events: Mutex<Vec<CdrEvent>>,
        failing: AtomicBool,
    }

    impl RecordingCdrSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                failing: AtomicBool::new(true),
            }
        }

        pub fn events(&self) -> Vec<CdrEvent> {
            self.events.lock().clone()
        }

        pub fn count(&self, kind: &str) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| e.kind() == kind)
                .count()
        }
    }

    impl CdrSink for RecordingCdrSink {
        fn record(&self, event: &CdrEvent) -> Result<(), CdrError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CdrError::Unavailable("mock sink failing".to_string()));
            }
            self.events.lock().push(event.clone());
            Ok(())
        }
    }
}
