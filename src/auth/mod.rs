//! OAuth credential lifecycle: authorization, redirect handling, session
//! tokens and transparent refresh.

pub mod cipher;
pub mod identity;
pub mod oauth;
pub mod session;

pub use cipher::SecretCipher;
pub use identity::{DiscordIdentityClient, DiscordUser, IdentityProvider};
pub use oauth::{DiscordOAuthClient, OAuthGateway, ProviderError};
pub use session::SessionSigner;

use crate::db::{CredentialStore, StateStore};
use crate::error::{AppResult, AuthError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a completed authorization redirect
#[derive(Debug, Clone)]
pub struct OAuthExchange {
    pub user: DiscordUser,
    pub access_token: String,
}

/// A confirmed identity behind a session token
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub user: DiscordUser,
    pub access_token: String,
}

pub struct AuthManager {
    signer: SessionSigner,
    states: StateStore,
    tokens: CredentialStore,
    oauth: Arc<dyn OAuthGateway>,
    identity: Arc<dyn IdentityProvider>,
    state_ttl_secs: u64,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("state_ttl_secs", &self.state_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn new(
        signer: SessionSigner,
        states: StateStore,
        tokens: CredentialStore,
        oauth: Arc<dyn OAuthGateway>,
        identity: Arc<dyn IdentityProvider>,
        state_ttl_secs: u64,
    ) -> Self {
        Self {
            signer,
            states,
            tokens,
            oauth,
            identity,
            state_ttl_secs,
        }
    }

    /// Mint a state and return the provider URL to send the user to
    pub async fn init_authorisation(&self) -> AppResult<String> {
        let state = self.states.create_state(self.state_ttl_secs).await?;
        Ok(self.oauth.authorize_url(&state))
    }

    pub async fn handle_redirect(&self, code: &str, state: &str) -> AppResult<OAuthExchange> {
        if !self.states.consume(state).await? {
            return Err(AuthError::InvalidState.into());
        }

        let grant = self
            .oauth
            .exchange_code(code)
            .await
            .map_err(|e| AuthError::CodeExchangeFailed(e.to_string()))?;

        let user = self
            .identity
            .resolve(&grant.access_token)
            .await
            .ok_or(AuthError::JustCreatedTokenInvalid)?;

        if let Some(old) = self.tokens.upsert(&user.id, &grant).await? {
            self.oauth.revoke_token(&old).await;
        }

        info!("Stored credential for {}", user.id);
        Ok(OAuthExchange {
            user,
            access_token: grant.access_token,
        })
    }

    /// Resolve a session token to a live identity, refreshing the stored
    /// credential if needed
    pub async fn get_from_token(&self, token: &str) -> AppResult<TokenResponse> {
        let subject = self.signer.verify(token)?;
        let stored = self
            .tokens
            .get(&subject)
            .await?
            .ok_or(AuthError::NoSuchToken)?;

        if !stored.is_expired(Utc::now()) {
            match self.identity.resolve(&stored.access_token).await {
                Some(user) if user.id == subject => {
                    return Ok(TokenResponse {
                        user,
                        access_token: stored.access_token,
                    });
                }
                Some(user) => warn!(
                    "Token for {} resolved to {}, refreshing",
                    subject, user.id
                ),
                None => warn!("Unexpired token for {} failed confirmation, refreshing", subject),
            }
        } else {
            debug!("Token for {} expired, refreshing", subject);
        }

        let refreshed = self
            .oauth
            .refresh_token(&stored.refresh_token)
            .await
            .map_err(|e| AuthError::RefreshFailure(e.to_string()))?;

        if let Some(old) = self.tokens.replace(&subject, &refreshed).await? {
            self.oauth.revoke_token(&old).await;
        }

        let user = self
            .identity
            .resolve(&refreshed.access_token)
            .await
            .filter(|user| user.id == subject)
            .ok_or(AuthError::JustRefreshedTokenInvalid)?;

        Ok(TokenResponse {
            user,
            access_token: refreshed.access_token,
        })
    }

    /// Sign a session token for a subject already known to be valid
    pub fn create_user_token(&self, subject: &str) -> AppResult<String> {
        Ok(self.signer.sign(subject)?)
    }

    /// Drop expired anti-CSRF states
    pub async fn purge_expired_states(&self) -> AppResult<u64> {
        self.states.purge_expired().await
    }
}
