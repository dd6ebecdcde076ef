//! OAuth provider seam and its Discord implementation.

use crate::config::OAuthConfig;
use crate::db::TokenGrant;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AccessToken, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    RefreshToken, RevocationUrl, Scope, StandardRevocableToken, TokenResponse, TokenUrl,
};
use thiserror::Error;
use tracing::{debug, warn};

/// The provider rejected a call or answered with something unusable
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// Authorization-code flow against an OAuth provider
#[async_trait]
pub trait OAuthGateway: Send + Sync {
    /// Provider URL that starts authorization, embedding `state`
    fn authorize_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Best effort; failures are logged, never returned
    async fn revoke_token(&self, access_token: &str);
}

/// Discord's OAuth2 endpoints via the `oauth2` crate
pub struct DiscordOAuthClient {
    client: BasicClient,
    scopes: Vec<String>,
}

impl std::fmt::Debug for DiscordOAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordOAuthClient")
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl DiscordOAuthClient {
    pub fn new(config: &OAuthConfig) -> AppResult<Self> {
        let invalid = |what: &str, e: oauth2::url::ParseError| {
            AppError::validation(format!("invalid oauth {}: {}", what, e))
        };

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.authorize_url.clone()).map_err(|e| invalid("authorize_url", e))?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(|e| invalid("token_url", e))?),
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_uri.clone()).map_err(|e| invalid("redirect_uri", e))?,
        )
        .set_revocation_uri(
            RevocationUrl::new(config.revoke_url.clone()).map_err(|e| invalid("revoke_url", e))?,
        );

        Ok(Self {
            client,
            scopes: config.scopes.clone(),
        })
    }
}

/// Convert a provider response, requiring the fields a stored credential needs
fn into_grant(response: BasicTokenResponse) -> Result<TokenGrant, ProviderError> {
    let refresh_token = response
        .refresh_token()
        .ok_or_else(|| ProviderError("response is missing refresh_token".to_string()))?;
    let expires_in = response
        .expires_in()
        .ok_or_else(|| ProviderError("response is missing expires_in".to_string()))?;
    let expires_in = Duration::from_std(expires_in)
        .map_err(|e| ProviderError(format!("expires_in out of range: {}", e)))?;

    Ok(TokenGrant {
        access_token: response.access_token().secret().clone(),
        refresh_token: refresh_token.secret().clone(),
        expires_at: Utc::now() + expires_in,
    })
}

#[async_trait]
impl OAuthGateway for DiscordOAuthClient {
    fn authorize_url(&self, state: &str) -> String {
        let state = state.to_string();
        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("prompt", "none")
            .url();
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| ProviderError(e.to_string()))?;

        debug!("Exchanged authorization code");
        into_grant(response)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| ProviderError(e.to_string()))?;

        debug!("Refreshed access token");
        into_grant(response)
    }

    async fn revoke_token(&self, access_token: &str) {
        let token = StandardRevocableToken::AccessToken(AccessToken::new(access_token.to_string()));
        let request = match self.client.revoke_token(token) {
            Ok(request) => request,
            Err(e) => {
                warn!("Token revocation is not configured: {}", e);
                return;
            }
        };

        match request.request_async(async_http_client).await {
            Ok(()) => debug!("Revoked superseded access token"),
            Err(e) => warn!("Failed to revoke access token: {}", e),
        }
    }
}
