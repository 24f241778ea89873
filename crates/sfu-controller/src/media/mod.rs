//! Media engine seam.
//!
//! Everything the control plane asks of a media-processing node goes through
//! the [`MediaEngine`] trait: pipelines, WebRTC and player endpoints, filters,
//! SDP negotiation and element wiring.
//!
//! - `engine` - The trait, its error type and error classification
//! - `rpc_client` - JSON-RPC over WebSocket implementation for real nodes
//! - `mock` - In-memory implementation for tests

pub mod engine;
pub mod mock;
pub mod rpc_client;

pub use engine::{
    ElementId, ErrorClass, ErrorClassifier, MediaEngine, MediaEngineError, MediaEvent,
    MediaEventKind, PlayerOptions, ReconnectOutcome,
};
