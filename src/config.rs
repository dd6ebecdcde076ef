use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

const DISCORD_API: &str = "https://discord.com/api/v10";

/// Discord bot and guild configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub guild_id: String,
    /// Channel where pending-admission notices are posted for moderators
    pub pending_channel_id: String,
    /// Channel newly-joined users land in while they wait
    pub holding_channel_id: String,
    /// Channel that records every accept and ban
    pub log_channel_id: String,
    /// User that is always allowed to admit, regardless of stored role
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// OAuth client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_revoke_url")]
    pub revoke_url: String,
    /// Base URL for identity lookups (`/users/@me`)
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
}

fn default_authorize_url() -> String {
    "https://discord.com/oauth2/authorize".to_string()
}

fn default_token_url() -> String {
    format!("{}/oauth2/token", DISCORD_API)
}

fn default_revoke_url() -> String {
    format!("{}/oauth2/token/revoke", DISCORD_API)
}

fn default_api_base() -> String {
    DISCORD_API.to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["identify".to_string(), "guilds.join".to_string()]
}

fn default_state_ttl() -> u64 {
    3 * 60
}

/// Key material. Supplied through the environment, never a checked-in file.
#[derive(Deserialize, Clone)]
pub struct KeysConfig {
    /// Base64-encoded 32-byte AES-256-GCM key for stored OAuth tokens
    pub token_key: String,
    /// HMAC secret for session tokens
    pub session_secret: String,
    #[serde(default = "default_session_hours")]
    pub session_lifetime_hours: u64,
}

fn default_session_hours() -> u64 {
    24 * 30
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("token_key", &"<redacted>")
            .field("session_secret", &"<redacted>")
            .field("session_lifetime_hours", &self.session_lifetime_hours)
            .finish()
    }
}

/// Discord role ids the admission flow hands out
#[derive(Debug, Deserialize, Clone)]
pub struct RolesConfig {
    pub guest: String,
    pub member: String,
    pub moderator: String,
    pub irl: String,
    pub work: String,
}

/// Web server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Admitted-user cache settings
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub admitted_ttl_secs: u64,
    #[serde(default = "default_cache_size")]
    pub admitted_max_size: usize,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_size() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            admitted_ttl_secs: default_cache_ttl(),
            admitted_max_size: default_cache_size(),
        }
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub oauth: OAuthConfig,
    pub keys: KeysConfig,
    pub roles: RolesConfig,
    pub web: WebConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Self::environment())
            .build()?;

        config.try_deserialize()
    }

    /// Environment source, e.g. GATEHOUSE_OAUTH__CLIENT_SECRET, GATEHOUSE_WEB__PORT
    fn environment() -> Environment {
        Environment::with_prefix("GATEHOUSE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("oauth.scopes")
    }

    /// Initialize the global config singleton
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }
}

impl WebConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DiscordConfig {
    /// Deep link into the holding channel
    pub fn holding_channel_url(&self) -> String {
        format!(
            "https://discord.com/channels/{}/{}",
            self.guild_id, self.holding_channel_id
        )
    }
}
