use gatehouse::{
    admission::{AdmissionCoordinator, AdmittedUserCache, GuildGateway, Role, RoleIds},
    auth::{
        AuthManager, DiscordIdentityClient, DiscordOAuthClient, SecretCipher, SessionSigner,
    },
    bot::{self, SerenityGuild},
    config::AppConfig,
    db::{self, AdmissionStore, AdmittedUserStore, CredentialStore, StateStore},
    web,
};
use poise::serenity_prelude::Http;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired anti-CSRF states are swept
const STATE_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gatehouse v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!("Configuration loaded");

    // Initialize database
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("Database connected: {}", config.database.url);

    db::init_db(&pool).await?;

    let cipher = Arc::new(
        SecretCipher::from_base64(&config.keys.token_key)
            .map_err(|e| anyhow::anyhow!("Invalid token key: {}", e))?,
    );
    let signer = SessionSigner::new(
        config.keys.session_secret.as_bytes(),
        chrono::Duration::hours(config.keys.session_lifetime_hours as i64),
    );

    let auth = Arc::new(AuthManager::new(
        signer,
        StateStore::new(pool.clone()),
        CredentialStore::new(pool.clone(), cipher),
        Arc::new(DiscordOAuthClient::new(&config.oauth)?),
        Arc::new(DiscordIdentityClient::new(&config.oauth)?),
        config.oauth.state_ttl_secs,
    ));
    info!("Auth manager initialized");

    let roles = RoleIds::from(&config.roles);
    let http = Arc::new(Http::new(&config.discord.bot_token));
    let guild: Arc<dyn GuildGateway> = Arc::new(SerenityGuild::new(
        http,
        &config.discord,
        roles.role(Role::Moderator),
    )?);

    let admitted = Arc::new(AdmittedUserCache::new(
        AdmittedUserStore::new(pool.clone()),
        config.discord.owner_id.clone(),
        config.cache.admitted_ttl_secs,
        config.cache.admitted_max_size,
    ));
    let coordinator = Arc::new(AdmissionCoordinator::new(
        AdmissionStore::new(pool.clone()),
        guild.clone(),
        admitted,
        roles,
    ));

    // Periodically drop states that were never redeemed
    let purge_auth = auth.clone();
    let purge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match purge_auth.purge_expired_states().await {
                Ok(0) => {}
                Ok(n) => debug!("Purged {} expired oauth states", n),
                Err(e) => warn!("Failed to purge oauth states: {}", e),
            }
        }
    });

    let web_state = web::AppState {
        auth,
        coordinator: coordinator.clone(),
        guild,
        holding_url: config.discord.holding_channel_url(),
    };
    let app = web::create_router(web_state);

    // Start web server in background
    let web_addr = config.web.bind_addr();
    let listener = TcpListener::bind(&web_addr).await?;
    info!("Web server listening on http://{}", web_addr);

    let web_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Web server error: {}", e);
        }
    });

    info!("Starting Discord bot...");
    let bot_result = bot::start_bot(&config.discord.bot_token, coordinator).await;

    purge_handle.abort();
    web_handle.abort();

    match bot_result {
        Ok(()) => {
            info!("Discord bot shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Discord bot error: {}", e);
            Err(anyhow::anyhow!("{}", e))
        }
    }
}
