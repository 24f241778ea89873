//! Recording orchestration.
//!
//! The controller does not record media itself. It tells a coordinator when
//! session-wide recordings start and stop and when individually recorded
//! streams appear and disappear.

use crate::models::{RecordingInfo, RecordingProperties};
use async_trait::async_trait;
use common::types::{ParticipantPublicId, SessionId, StreamId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("Recording is disabled")]
    Disabled,

    #[error("Recording {0} not found")]
    NotFound(String),

    #[error("Session {0} is already being recorded")]
    AlreadyRecording(String),

    #[error("Recording {0} is still starting")]
    Starting(String),

    #[error("Recording failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait RecordingCoordinator: Send + Sync {
    fn session_is_being_recorded(&self, session: &SessionId) -> bool;

    async fn start_individual_stream_recording(
        &self,
        session: &SessionId,
        participant: &ParticipantPublicId,
        stream: &StreamId,
    ) -> Result<(), RecordingError>;

    /// `stopped_at_ms` is set when the stream ended because its media node
    /// went away, so the recording can be cut at the real end time.
    async fn stop_individual_stream_recording(
        &self,
        session: &SessionId,
        stream: &StreamId,
        stopped_at_ms: Option<i64>,
    ) -> Result<(), RecordingError>;

    async fn start_session_recording(
        &self,
        session: &SessionId,
        properties: &RecordingProperties,
    ) -> Result<RecordingInfo, RecordingError>;

    async fn stop_session_recording(
        &self,
        recording_id: &str,
        reason: &str,
    ) -> Result<RecordingInfo, RecordingError>;
}

/// Coordinator used when recording is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecordingCoordinator;

#[async_trait]
impl RecordingCoordinator for NoopRecordingCoordinator {
    fn session_is_being_recorded(&self, _session: &SessionId) -> bool {
        false
    }

    async fn start_individual_stream_recording(
        &self,
        _session: &SessionId,
        _participant: &ParticipantPublicId,
        _stream: &StreamId,
    ) -> Result<(), RecordingError> {
        Ok(())
    }

    async fn stop_individual_stream_recording(
        &self,
        _session: &SessionId,
        _stream: &StreamId,
        _stopped_at_ms: Option<i64>,
    ) -> Result<(), RecordingError> {
        Ok(())
    }

    async fn start_session_recording(
        &self,
        _session: &SessionId,
        _properties: &RecordingProperties,
    ) -> Result<RecordingInfo, RecordingError> {
        Err(RecordingError::Disabled)
    }

    async fn stop_session_recording(
        &self,
        _recording_id: &str,
        _reason: &str,
    ) -> Result<RecordingInfo, RecordingError> {
        Err(RecordingError::Disabled)
    }
}

pub mod mock {
    use super::*;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory coordinator that tracks which sessions and streams are
    /// being recorded.
    #[derive(Default)]
    pub struct MockRecordingCoordinator {
        recordings: DashMap<String, RecordingInfo>,
        by_session: DashMap<SessionId, String>,
        individual: Mutex<Vec<(SessionId, StreamId)>>,
        stopped_streams: Mutex<Vec<(StreamId, Option<i64>)>>,
        next_id: AtomicUsize,
    }

    impl MockRecordingCoordinator {
        pub fn new() -> Self {
            Self::default()
        }

        /// Mark a session as recorded without going through
        /// `start_session_recording`.
        pub fn mark_recording(&self, session: &SessionId) {
            self.by_session.insert(session.clone(), "preset".to_string());
        }

        pub fn individual_recordings(&self) -> Vec<(SessionId, StreamId)> {
            self.individual.lock().clone()
        }

        pub fn stopped_streams(&self) -> Vec<(StreamId, Option<i64>)> {
            self.stopped_streams.lock().clone()
        }
    }

    #[async_trait]
    impl RecordingCoordinator for MockRecordingCoordinator {
        fn session_is_being_recorded(&self, session: &SessionId) -> bool {
            self.by_session.contains_key(session)
        }

        async fn start_individual_stream_recording(
            &self,
            session: &SessionId,
            _participant: &ParticipantPublicId,
            stream: &StreamId,
        ) -> Result<(), RecordingError> {
            self.individual.lock().push((session.clone(), stream.clone()));
            Ok(())
        }

        async fn stop_individual_stream_recording(
            &self,
            _session: &SessionId,
            stream: &StreamId,
            stopped_at_ms: Option<i64>,
        ) -> Result<(), RecordingError> {
            self.stopped_streams
                .lock()
                .push((stream.clone(), stopped_at_ms));
            Ok(())
        }

        async fn start_session_recording(
            &self,
            session: &SessionId,
            properties: &RecordingProperties,
        ) -> Result<RecordingInfo, RecordingError> {
            if self.by_session.contains_key(session) {
                return Err(RecordingError::AlreadyRecording(session.to_string()));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let id = if n == 0 {
                session.to_string()
            } else {
                format!("{session}-{n}")
            };
            let info = RecordingInfo {
                id: id.clone(),
                session_id: session.to_string(),
                name: if properties.name.is_empty() {
                    id.clone()
                } else {
                    properties.name.clone()
                },
                output_mode: properties.output_mode,
                has_audio: properties.has_audio,
                has_video: properties.has_video,
                status: "started".to_string(),
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            self.recordings.insert(id.clone(), info.clone());
            self.by_session.insert(session.clone(), id);
            Ok(info)
        }

        async fn stop_session_recording(
            &self,
            recording_id: &str,
            _reason: &str,
        ) -> Result<RecordingInfo, RecordingError> {
            let (_, mut info) = self
                .recordings
                .remove(recording_id)
                .ok_or_else(|| RecordingError::NotFound(recording_id.to_string()))?;
            self.by_session
                .remove(&SessionId::new(info.session_id.clone()));
            info.status = "stopped".to_string();
            Ok(info)
        }
    }
}
