//! Shared fixtures: an in-memory database and recording fakes for the
//! OAuth provider, the identity endpoint and the guild.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gatehouse::admission::{
    AdmissionCoordinator, AdmittedUserCache, AuditEntry, Decision, GuildGateway, RoleIds,
};
use gatehouse::auth::cipher::generate_key_base64;
use gatehouse::auth::{
    AuthManager, DiscordUser, IdentityProvider, OAuthGateway, ProviderError, SecretCipher,
    SessionSigner,
};
use gatehouse::config::RolesConfig;
use gatehouse::db::{
    self, AdmissionStore, AdmittedUserStore, CredentialStore, DbPool, StateStore, TokenGrant,
};
use gatehouse::{AppError, AppResult};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SESSION_SECRET: &[u8] = b"integration-test-session-secret";
pub const USER_ID: &str = "80351110224678912";

pub async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_db(&pool).await.unwrap();
    pool
}

pub fn test_cipher() -> Arc<SecretCipher> {
    Arc::new(SecretCipher::from_base64(&generate_key_base64()).unwrap())
}

pub fn grant(access: &str, refresh: &str, expires_in: Duration) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: Utc::now() + expires_in,
    }
}

/// OAuth provider that mints numbered tokens and records revocations
#[derive(Default)]
pub struct FakeOAuth {
    issued: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub fail_exchange: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub revoked: Mutex<Vec<String>>,
}

impl FakeOAuth {
    fn next_grant(&self) -> TokenGrant {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        grant(
            &format!("access-{}", n),
            &format!("refresh-{}", n),
            Duration::hours(1),
        )
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl OAuthGateway for FakeOAuth {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://auth.example/authorize?state={}", state)
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, ProviderError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(ProviderError("invalid_grant".to_string()));
        }
        Ok(self.next_grant())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ProviderError("invalid_grant".to_string()));
        }
        Ok(self.next_grant())
    }

    async fn revoke_token(&self, access_token: &str) {
        self.revoked.lock().unwrap().push(access_token.to_string());
    }
}

/// Identity endpoint that accepts every token unless told otherwise
pub struct FakeIdentity {
    pub user: DiscordUser,
    pub reject_all: AtomicBool,
    pub rejected: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl FakeIdentity {
    pub fn new(user_id: &str) -> Self {
        Self {
            user: DiscordUser {
                id: user_id.to_string(),
                username: "ferris".to_string(),
                global_name: Some("Ferris".to_string()),
                discriminator: Some("0".to_string()),
            },
            reject_all: AtomicBool::new(false),
            rejected: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reject(&self, token: &str) {
        self.rejected.lock().unwrap().insert(token.to_string());
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn resolve(&self, access_token: &str) -> Option<DiscordUser> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_all.load(Ordering::SeqCst)
            || self.rejected.lock().unwrap().contains(access_token)
        {
            return None;
        }
        Some(self.user.clone())
    }
}

/// Guild that records every side effect as a string. Membership checks
/// are not recorded.
#[derive(Default)]
pub struct FakeGuild {
    announced: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
    pub departed: Mutex<HashSet<String>>,
    pub fail_add_role: AtomicBool,
}

impl FakeGuild {
    pub fn depart(&self, user_id: &str) {
        self.departed.lock().unwrap().insert(user_id.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl GuildGateway for FakeGuild {
    async fn is_member(&self, user_id: &str) -> AppResult<bool> {
        Ok(!self.departed.lock().unwrap().contains(user_id))
    }

    async fn add_role(&self, user_id: &str, role_id: &str) -> AppResult<()> {
        if self.fail_add_role.load(Ordering::SeqCst) {
            return Err(AppError::NotFound("Unknown Member".to_string()));
        }
        self.record(format!("add_role:{}:{}", user_id, role_id));
        Ok(())
    }

    async fn ban_user(&self, user_id: &str, _reason: &str) -> AppResult<()> {
        self.record(format!("ban:{}", user_id));
        Ok(())
    }

    async fn kick_user(&self, user_id: &str, _reason: &str) -> AppResult<()> {
        self.record(format!("kick:{}", user_id));
        Ok(())
    }

    async fn join_guild(&self, user_id: &str, _access_token: &str) -> AppResult<()> {
        self.record(format!("join:{}", user_id));
        Ok(())
    }

    async fn announce_pending(&self, user: &DiscordUser) -> AppResult<String> {
        let n = self.announced.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(format!("announce:{}", user.id));
        Ok(format!("{}", 9000 + n))
    }

    async fn retract_announcement(&self, message_id: &str) -> AppResult<()> {
        self.record(format!("retract:{}", message_id));
        Ok(())
    }

    async fn announce_decision(&self, entry: &AuditEntry) -> AppResult<()> {
        let kind = match entry.decision {
            Decision::Admitted { .. } => "admitted",
            Decision::Banned => "banned",
        };
        self.record(format!("audit:{}:{}:{}", kind, entry.target, entry.actor));
        Ok(())
    }
}

/// Auth manager wired to fakes, plus handles for inspecting them
pub struct AuthHarness {
    pub pool: DbPool,
    pub cipher: Arc<SecretCipher>,
    pub oauth: Arc<FakeOAuth>,
    pub identity: Arc<FakeIdentity>,
    pub auth: Arc<AuthManager>,
}

impl AuthHarness {
    pub async fn new() -> Self {
        let pool = test_pool().await;
        let cipher = test_cipher();
        let oauth = Arc::new(FakeOAuth::default());
        let identity = Arc::new(FakeIdentity::new(USER_ID));

        let auth = Arc::new(AuthManager::new(
            SessionSigner::new(SESSION_SECRET, Duration::hours(1)),
            StateStore::new(pool.clone()),
            CredentialStore::new(pool.clone(), cipher.clone()),
            oauth.clone(),
            identity.clone(),
            180,
        ));

        Self {
            pool,
            cipher,
            oauth,
            identity,
            auth,
        }
    }

    /// A second handle on the credential table, sharing the key
    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.pool.clone(), self.cipher.clone())
    }

    /// Run authorisation and return the state embedded in the provider URL
    pub async fn start_authorisation(&self) -> String {
        let url = self.auth.init_authorisation().await.unwrap();
        url.split("state=").nth(1).unwrap().to_string()
    }
}

pub fn roles_config() -> RolesConfig {
    RolesConfig {
        guest: "1010".to_string(),
        member: "1020".to_string(),
        moderator: "1030".to_string(),
        irl: "1040".to_string(),
        work: "1050".to_string(),
    }
}

pub const OWNER_ID: &str = "1";

/// Coordinator wired to a recording guild
pub struct AdmissionHarness {
    pub pool: DbPool,
    pub guild: Arc<FakeGuild>,
    pub coordinator: Arc<AdmissionCoordinator>,
}

impl AdmissionHarness {
    pub async fn with_pool(pool: DbPool) -> Self {
        let guild = Arc::new(FakeGuild::default());
        let admitted = Arc::new(AdmittedUserCache::new(
            AdmittedUserStore::new(pool.clone()),
            Some(OWNER_ID.to_string()),
            300,
            100,
        ));
        let coordinator = Arc::new(AdmissionCoordinator::new(
            AdmissionStore::new(pool.clone()),
            guild.clone(),
            admitted,
            RoleIds::from(&roles_config()),
        ));

        Self {
            pool,
            guild,
            coordinator,
        }
    }

    pub async fn new() -> Self {
        Self::with_pool(test_pool().await).await
    }
}

pub fn discord_user(id: &str) -> DiscordUser {
    DiscordUser {
        id: id.to_string(),
        username: format!("user{}", id),
        global_name: None,
        discriminator: Some("0".to_string()),
    }
}
