//! Token issuance.

use crate::models::{Role, TokenOptions};
use common::secret::{ExposeSecret, SecretString};
use common::types::{random_tag, SessionId, TOKEN_PREFIX};

/// A credential allowing one participant to join one session.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: SecretString,
    pub session_id: SessionId,
    pub role: Role,
    pub server_data: String,
    pub options: Option<TokenOptions>,
}

impl Token {
    pub fn matches(&self, presented: &str) -> bool {
        self.value.expose_secret() == presented
    }
}

/// Produces tokens for a session.
pub trait TokenIssuer: Send + Sync {
    fn issue(
        &self,
        session: &SessionId,
        role: Role,
        server_data: &str,
        options: Option<TokenOptions>,
    ) -> Token;
}

/// Issues connection URLs of the form
/// `<ws_url>?sessionId=<id>&token=tok_<tag>&role=<ROLE>&version=<version>`.
#[derive(Debug, Clone)]
pub struct DefaultTokenIssuer {
    ws_url: String,
    version: String,
}

impl DefaultTokenIssuer {
    pub fn new(ws_url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            version: version.into(),
        }
    }
}

impl TokenIssuer for DefaultTokenIssuer {
    fn issue(
        &self,
        session: &SessionId,
        role: Role,
        server_data: &str,
        options: Option<TokenOptions>,
    ) -> Token {
        let value = format!(
            "{}?sessionId={}&token={}{}&role={}&version={}",
            self.ws_url,
            session,
            TOKEN_PREFIX,
            random_tag(15),
            role.as_str(),
            self.version
        );
        Token {
            value: SecretString::from(value),
            session_id: session.clone(),
            role,
            server_data: server_data.to_string(),
            options,
        }
    }
}
