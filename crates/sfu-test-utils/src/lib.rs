//! # SFU Test Utilities
//!
//! Shared test utilities for the SFU controller.
//!
//! This crate provides:
//! - In-process control plane wired to mock media nodes and mock
//!   collaborators (`TestControlPlane`)
//! - Server test harness (`TestSfuServer` for REST tests)
//! - Fixtures (SDP offers, ICE candidates, config vars)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestSfuServer::spawn().await?;
//!     let response = reqwest::Client::new()
//!         .post(format!("{}/api/sessions", server.url()))
//!         .send()
//!         .await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod control_plane;
pub mod fixtures;
pub mod server_harness;

pub use control_plane::*;
pub use fixtures::*;
pub use server_harness::*;
