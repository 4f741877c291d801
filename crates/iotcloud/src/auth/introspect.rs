use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::config::AuthConfig;
use super::error::AuthError;

/// Which credential set to introspect a token against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClass {
    Hub,
    Web,
    Assistant,
}

impl SessionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionClass::Hub => "hub",
            SessionClass::Web => "web",
            SessionClass::Assistant => "assistant",
        }
    }
}

/// The subset of the RFC 7662 introspection response the relay uses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub username: String,
}

/// Token verification seam. The production implementation calls the remote
/// OAuth server; tests plug in a canned one.
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    async fn introspect(&self, token: &str, class: SessionClass)
    -> Result<UserInfo, AuthError>;
}

/// Introspect `token` and reduce the result to the owning username.
///
/// A token only authorizes a session when it is active and bound to a
/// non-empty username; anything else is a rejection.
pub async fn authorize(
    introspector: &dyn TokenIntrospector,
    token: &str,
    class: SessionClass,
) -> Result<String, AuthError> {
    let info = introspector.introspect(token, class).await?;
    if !info.active || info.username.is_empty() {
        debug!(class = class.as_str(), active = info.active, "token rejected");
        return Err(AuthError::Rejected);
    }
    Ok(info.username)
}

/// Calls the configured OAuth introspection endpoint with the credentials
/// for the requesting session class.
pub struct RemoteIntrospector {
    http: reqwest::Client,
    config: AuthConfig,
}

impl RemoteIntrospector {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TokenIntrospector for RemoteIntrospector {
    async fn introspect(
        &self,
        token: &str,
        class: SessionClass,
    ) -> Result<UserInfo, AuthError> {
        let creds = self.config.credentials(class);
        let response = self
            .http
            .post(&self.config.introspect_url)
            .basic_auth(&creds.client, Some(&creds.secret))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::InvalidResponse(format!(
                "introspection returned {}",
                response.status()
            )));
        }
        response
            .json::<UserInfo>()
            .await
            .map_err(|err| AuthError::InvalidResponse(err.to_string()))
    }
}
