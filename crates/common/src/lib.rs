//! Common utilities and types shared across the SFU control plane crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifier newtypes and their generators
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
