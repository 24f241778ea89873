//! Identifier newtypes shared across the SFU control plane.
//!
//! Every identifier is an opaque string on the wire. Generated identifiers
//! carry a type prefix (`ses_`, `con_`, `str_`, ...) followed by one upper-case
//! letter and a run of alphanumerics, so they are readable in logs and can be
//! told apart at a glance.

use crate::error::{CommonError, Result};
use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix for generated session ids
pub const SESSION_PREFIX: &str = "ses_";
/// Prefix for browser participant public ids
pub const PARTICIPANT_PREFIX: &str = "con_";
/// Prefix for external feed (IP camera) participant public ids
pub const EXTERNAL_FEED_PREFIX: &str = "ipc_";
/// Prefix for stream ids
pub const STREAM_PREFIX: &str = "str_";
/// Prefix for token values
pub const TOKEN_PREFIX: &str = "tok_";
/// Prefix for media node ids
pub const NODE_PREFIX: &str = "kms_";

/// One upper-case ASCII letter followed by `len` alphanumerics.
#[must_use]
pub fn random_tag(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let head = char::from(rng.gen_range(b'A'..=b'Z'));
    let mut tag = String::with_capacity(len + 1);
    tag.push(head);
    tag.push_str(&Alphanumeric.sample_string(&mut rng, len));
    tag
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a room
    SessionId
);
string_id!(
    /// Identifier of a participant that other participants may see
    ParticipantPublicId
);
string_id!(
    /// Identifier of a participant known only to the server and its owner
    ParticipantPrivateId
);
string_id!(
    /// Identifier of a published media stream
    StreamId
);
string_id!(
    /// Identifier of a media-processing node
    NodeId
);

impl SessionId {
    /// Generate `ses_` plus a ten character tag.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{SESSION_PREFIX}{}", random_tag(9)))
    }

    /// Accept a caller-chosen id made of `[A-Za-z0-9_-]`.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` for an empty id or any other character.
    pub fn custom(value: &str) -> Result<Self> {
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CommonError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl ParticipantPublicId {
    /// Generate a public id for a browser participant.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{PARTICIPANT_PREFIX}{}", random_tag(9)))
    }

    /// Generate a public id for an external feed participant.
    #[must_use]
    pub fn generate_external_feed() -> Self {
        Self(format!("{EXTERNAL_FEED_PREFIX}{}", random_tag(9)))
    }
}

impl ParticipantPrivateId {
    /// Generate a random private id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl StreamId {
    /// Build a stream id for a publisher.
    ///
    /// The layout is `str_<first 3 chars of media type>_<tag>_<owner>`, where
    /// the tag is one upper-case letter and three alphanumerics.
    #[must_use]
    pub fn for_publisher(media_type: &str, owner: &ParticipantPublicId) -> Self {
        let short: String = media_type.chars().take(3).collect();
        Self(format!("{STREAM_PREFIX}{short}_{}_{owner}", random_tag(3)))
    }
}

impl NodeId {
    /// Generate `kms_` plus an eight character tag.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{NODE_PREFIX}{}", random_tag(7)))
    }
}
