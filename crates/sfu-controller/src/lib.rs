//! SFU Controller Library
//!
//! Control plane of a selective forwarding unit. Media is processed by
//! external media nodes; this crate decides which node hosts each session,
//! builds and tears down the per-participant publisher and subscriber
//! endpoints on that node, negotiates SDP and ICE, and keeps everything
//! consistent while participants, sessions and nodes come and go.
//!
//! # Modules
//!
//! - [`cluster`] - Media nodes, load ranking and connectivity events
//! - [`media`] - The media engine seam and its JSON-RPC and mock implementations
//! - [`endpoint`] - Publisher, subscriber and filter lifecycles per participant
//! - [`session`] - Rooms, participants, the session registry and manager
//! - [`collaborators`] - Tokens, recording, CDR and signaling seams
//! - [`routes`] / [`handlers`] - REST API
//! - [`tasks`] - Node monitor and node event listener
//! - [`observability`] - Metrics and health probes

pub mod cluster;
pub mod collaborators;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod handlers;
pub mod media;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod session;
pub mod tasks;
