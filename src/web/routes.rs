use crate::admission::{AdmissionCoordinator, GuildGateway};
use crate::auth::AuthManager;
use crate::error::{AppError, AppResult};
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::{headers::Cookie, TypedHeader};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Name of the cookie carrying the signed session token
pub const SESSION_COOKIE: &str = "session";

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub coordinator: Arc<AdmissionCoordinator>,
    pub guild: Arc<dyn GuildGateway>,
    /// Where users land once they are in the guild
    pub holding_url: String,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Start authorization at the provider
pub async fn authorise(State(state): State<AppState>) -> AppResult<Redirect> {
    let url = state.auth.init_authorisation().await?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/",
        SESSION_COOKIE, token
    )
}

/// Provider redirect: finish the exchange and hand out a session cookie
pub async fn oauth_redirect(
    State(state): State<AppState>,
    Query(params): Query<RedirectParams>,
) -> AppResult<Response> {
    if let Some(error) = params.error {
        debug!("Provider returned error on redirect: {}", error);
        return Ok(Redirect::to("/authorise").into_response());
    }

    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Err(AppError::validation("missing code or state"));
    };

    let exchange = state.auth.handle_redirect(&code, &oauth_state).await?;
    let token = state.auth.create_user_token(&exchange.user.id)?;

    Ok((
        [(header::SET_COOKIE, session_cookie(&token))],
        Redirect::to("/join"),
    )
        .into_response())
}

/// Join the guild using the stored credential, then wait for a moderator
pub async fn join(
    State(state): State<AppState>,
    cookies: Option<TypedHeader<Cookie>>,
) -> AppResult<Response> {
    let Some(session) = cookies
        .as_ref()
        .and_then(|TypedHeader(c)| c.get(SESSION_COOKIE))
    else {
        return Ok(Redirect::to("/authorise").into_response());
    };

    let identity = match state.auth.get_from_token(session).await {
        Ok(identity) => identity,
        Err(e) if e.requires_reauth() => {
            debug!("Session needs re-authorisation: {}", e);
            return Ok(Redirect::to("/authorise").into_response());
        }
        Err(e) => return Err(e),
    };

    let user = identity.user;
    state.guild.join_guild(&user.id, &identity.access_token).await?;

    if state.coordinator.admitted().get(&user.id).await?.is_some() {
        info!("{} rejoined as an admitted user", user.id);
    } else {
        let message_id = state.coordinator.register_pending(&user).await?;
        info!("{} is waiting for review (notice {})", user.id, message_id);
    }

    Ok(Redirect::to(&state.holding_url).into_response())
}

/// Catch-all for unknown paths
async fn not_found() -> AppError {
    warn!("Request for unknown path");
    AppError::NotFound("no such page".to_string())
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/authorise", get(authorise))
        .route("/redirect", get(oauth_redirect))
        .route("/join", get(join))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
