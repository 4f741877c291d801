use serde::{Deserialize, Serialize};

use super::introspect::SessionClass;

pub const DEFAULT_INTROSPECT_URL: &str = "https://auth.wiklosoft.com/v1/oauth/introspect";

/// OAuth client credentials for one session class. Each class introspects
/// with its own client id, so a hub token cannot authorize a web session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_introspect_url")]
    pub introspect_url: String,
    #[serde(default)]
    pub hub: ClientCredentials,
    #[serde(default)]
    pub web: ClientCredentials,
    #[serde(default)]
    pub assistant: ClientCredentials,
}

fn default_introspect_url() -> String {
    DEFAULT_INTROSPECT_URL.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            introspect_url: default_introspect_url(),
            hub: ClientCredentials::default(),
            web: ClientCredentials::default(),
            assistant: ClientCredentials::default(),
        }
    }
}

impl AuthConfig {
    pub fn credentials(&self, class: SessionClass) -> &ClientCredentials {
        match class {
            SessionClass::Hub => &self.hub,
            SessionClass::Web => &self.web,
            SessionClass::Assistant => &self.assistant,
        }
    }

    /// Catch placeholder configs at startup instead of at the first login.
    pub fn validate(&self) -> Result<(), String> {
        if self.introspect_url.is_empty() {
            return Err("auth.introspect_url must not be empty".to_string());
        }
        for (class, creds) in [
            ("hub", &self.hub),
            ("web", &self.web),
            ("assistant", &self.assistant),
        ] {
            if creds.client.is_empty() || creds.secret.is_empty() {
                return Err(format!("auth.{class} client credentials are not configured"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_public_endpoint_but_fails_validation() {
        let config = AuthConfig::default();
        assert_eq!(config.introspect_url, DEFAULT_INTROSPECT_URL);
        assert!(config.validate().is_err());
    }

    #[test]
    fn each_class_has_its_own_credentials() {
        let mut config = AuthConfig::default();
        config.hub.client = "hub-client".to_string();
        config.web.client = "web-client".to_string();
        assert_eq!(config.credentials(SessionClass::Hub).client, "hub-client");
        assert_eq!(config.credentials(SessionClass::Web).client, "web-client");
    }
}
