pub mod admission;
pub mod admitted;
pub mod credentials;
pub mod models;
pub mod states;

pub use admission::{AdmissionStore, CloseOutcome};
pub use admitted::AdmittedUserStore;
pub use credentials::CredentialStore;
pub use models::*;
pub use states::StateStore;

use crate::error::AppResult;
use sqlx::{Pool, Sqlite};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

#[cfg(test)]
pub async fn setup_test_db() -> DbPool {
    use sqlx::sqlite::SqlitePoolOptions;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_db(&pool).await.expect("Failed to init database");
    pool
}

/// Initialize database with migrations
pub async fn init_db(pool: &DbPool) -> AppResult<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_states (
            state TEXT PRIMARY KEY NOT NULL,
            expires_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_credentials (
            user_id TEXT PRIMARY KEY NOT NULL,
            encrypted_token BLOB NOT NULL,
            encrypted_refresh_token BLOB NOT NULL,
            iv BLOB NOT NULL,
            refresh_iv BLOB NOT NULL,
            expires_at DATETIME NOT NULL,
            old_encrypted_token BLOB,
            old_iv BLOB,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users_pending_entry (
            target_user_id TEXT PRIMARY KEY NOT NULL,
            message_id TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_user_interaction_state (
            target_user_id TEXT NOT NULL,
            interactor_id TEXT NOT NULL,
            primary_role TEXT,
            aux_roles TEXT,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (target_user_id, interactor_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS admitted_users (
            user_id TEXT PRIMARY KEY NOT NULL,
            role TEXT NOT NULL,
            added_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aux_role_assignments (
            user_id TEXT NOT NULL,
            aux_role TEXT NOT NULL,
            added_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, aux_role)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_oauth_states_expiry ON oauth_states(expires_at)")
        .execute(pool)
        .await?;

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let pool = setup_test_db().await;
        init_db(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        for expected in [
            "admitted_users",
            "aux_role_assignments",
            "oauth_credentials",
            "oauth_states",
            "pending_user_interaction_state",
            "users_pending_entry",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }
}
