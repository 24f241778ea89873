//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used across the control plane. Session
//! tokens are bearer credentials: anyone holding one can join the room it was
//! issued for, so they are carried as [`SecretString`] from issuance until the
//! moment they are serialized back to the caller that requested them.
//!
//! `SecretString` implements `Debug` with redaction, so structs deriving
//! `Debug` stay safe to log via `{:?}` or tracing fields.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct IssuedToken {
//!     session: String,
//!     token: SecretString,
//! }
//!
//! let issued = IssuedToken {
//!     session: "ses_A123456789".to_string(),
//!     token: SecretString::from("wss://host?token=tok_Xabc"),
//! };
//!
//! assert!(!format!("{issued:?}").contains("tok_Xabc"));
//! assert!(issued.token.expose_secret().contains("tok_Xabc"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let token = SecretString::from("tok_Aabcdefghijklmno");
        let debug_str = format!("{token:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("tok_Aabcdefghijklmno"));
    }

    #[test]
    fn test_struct_with_token_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct Grant {
            session: String,
            token: SecretString,
        }

        let grant = Grant {
            session: "ses_B000000000".to_string(),
            token: SecretString::from("tok_Zsecretsecretsec"),
        };

        let debug_str = format!("{grant:?}");
        assert!(debug_str.contains("ses_B000000000"));
        assert!(!debug_str.contains("tok_Zsecretsecretsec"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct NodeCredentials {
            uri: String,
            password: SecretString,
        }

        let json = r#"{"uri": "ws://node:8888/kurento", "password": "node-pass"}"#;
        let creds: NodeCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.password.expose_secret(), "node-pass");
        assert!(!format!("{creds:?}").contains("node-pass"));
    }
}
