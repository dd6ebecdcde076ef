use crate::db::{DbPool, StateRow};
use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

/// Default lifetime of an authorization state.
pub const DEFAULT_STATE_TTL_SECS: u64 = 3 * 60;

/// Longest lifetime a caller may request.
pub const MAX_STATE_TTL_SECS: u64 = 30 * 60;

/// Single-use, short-lived anti-CSRF states for the OAuth redirect
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: DbPool,
}

impl StateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Mint a new state valid for `ttl_secs`
    pub async fn create_state(&self, ttl_secs: u64) -> AppResult<String> {
        if ttl_secs > MAX_STATE_TTL_SECS {
            return Err(AppError::validation(format!(
                "state TTL of {}s is greater than max of {}s",
                ttl_secs, MAX_STATE_TTL_SECS
            )));
        }

        let state = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);

        sqlx::query("INSERT INTO oauth_states (state, expires_at) VALUES (?, ?)")
            .bind(&state)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(state)
    }

    /// Check and burn a state. The row is deleted whether or not it expired.
    pub async fn consume(&self, state: &str) -> AppResult<bool> {
        let row = sqlx::query_as::<_, StateRow>(
            "DELETE FROM oauth_states WHERE state = ? RETURNING expires_at",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) if row.expires_at > Utc::now() => Ok(true),
            Some(_) => {
                debug!("Rejected expired oauth state");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Delete expired states
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
