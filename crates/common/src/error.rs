//! Common error types for the SFU control plane.

use thiserror::Error;

/// Errors shared by the control plane crates.
#[derive(Error, Debug)]
pub enum CommonError {
    /// An identifier did not match its expected format
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
