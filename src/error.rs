use crate::auth::cipher::CipherError;
use thiserror::Error;

/// Failure codes of the OAuth credential lifecycle.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid state found during redirect")]
    InvalidState,

    #[error("bad response from provider on code exchange: {0}")]
    CodeExchangeFailed(String),

    #[error("no stored token for that user")]
    NoSuchToken,

    #[error("not able to refresh oauth token: {0}")]
    RefreshFailure(String),

    #[error("token that was just created was invalid")]
    JustCreatedTokenInvalid,

    #[error("token that was just refreshed was invalid")]
    JustRefreshedTokenInvalid,

    #[error("session token did not pass validation")]
    InvalidSignature,
}

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Decryption error: {0}")]
    Decryption(#[from] CipherError),

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl AppError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether the caller should send the user back through authorization
    /// instead of showing an error.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Decryption(_))
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convert AppError to HTTP status codes for web responses
impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Discord(_) => StatusCode::BAD_GATEWAY,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Decryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(AuthError::CodeExchangeFailed(_) | AuthError::RefreshFailure(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16()
        });
        (status, axum::Json(body)).into_response()
    }
}
