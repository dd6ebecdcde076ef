use crate::config::OAuthConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// A Discord account as returned by `/users/@me`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl DiscordUser {
    /// Name to show moderators
    pub fn display_name(&self) -> String {
        let tag = match self.discriminator.as_deref() {
            Some(d) if d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        };
        match &self.global_name {
            Some(global) if global != &self.username => format!("{} ({})", global, tag),
            _ => tag,
        }
    }
}

/// Resolves an access token to the account it belongs to
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` if the token is not (or no longer) valid
    async fn resolve(&self, access_token: &str) -> Option<DiscordUser>;
}

pub struct DiscordIdentityClient {
    http: Client,
    base_url: String,
}

impl std::fmt::Debug for DiscordIdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordIdentityClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DiscordIdentityClient {
    pub fn new(config: &OAuthConfig) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for DiscordIdentityClient {
    async fn resolve(&self, access_token: &str) -> Option<DiscordUser> {
        let url = format!("{}/users/@me", self.base_url);

        let response = match self.http.get(&url).bearer_auth(access_token).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Identity lookup request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Identity lookup returned {}", response.status());
            return None;
        }

        match response.json::<DiscordUser>().await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Failed to parse identity response: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(global: Option<&str>, discriminator: Option<&str>) -> DiscordUser {
        DiscordUser {
            id: "1".to_string(),
            username: "ferris".to_string(),
            global_name: global.map(String::from),
            discriminator: discriminator.map(String::from),
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(user(None, Some("0")).display_name(), "ferris");
        assert_eq!(user(None, Some("1234")).display_name(), "ferris#1234");
        assert_eq!(user(Some("Ferris"), None).display_name(), "Ferris (ferris)");
        assert_eq!(user(Some("ferris"), None).display_name(), "ferris");
    }

    #[test]
    fn test_parses_users_me_payload() {
        let user: DiscordUser = serde_json::from_value(serde_json::json!({
            "id": "80351110224678912",
            "username": "nelly",
            "discriminator": "0",
            "global_name": null,
            "avatar": "8342729096ea3675442027381ff50dfe",
            "verified": true
        }))
        .unwrap();
        assert_eq!(user.id, "80351110224678912");
        assert_eq!(user.global_name, None);
    }
}
