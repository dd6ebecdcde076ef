//! Encrypted OAuth credential storage, one row per subject.
//!
//! Writes return the access token they replaced (when it differs from the new
//! one) so the caller can revoke it upstream. Keeping that revoke call in the
//! caller is what bounds each subject to one live upstream access token.
//!
//! `old_encrypted_token` and `old_iv` only carry the previous ciphertext out
//! through `RETURNING`. They are cleared in the same transaction, so a
//! superseded token never stays at rest.

use crate::auth::cipher::SecretCipher;
use crate::db::{CredentialRow, DbPool, SupersededRow, TokenGrant};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, error};

const UPSERT_CREDENTIAL: &str = r#"
INSERT INTO oauth_credentials (
    user_id, encrypted_token, encrypted_refresh_token, iv, refresh_iv, expires_at, updated_at
)
VALUES (?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(user_id) DO UPDATE SET
    old_encrypted_token = oauth_credentials.encrypted_token,
    old_iv = oauth_credentials.iv,
    encrypted_token = excluded.encrypted_token,
    encrypted_refresh_token = excluded.encrypted_refresh_token,
    iv = excluded.iv,
    refresh_iv = excluded.refresh_iv,
    expires_at = excluded.expires_at,
    updated_at = excluded.updated_at
RETURNING old_encrypted_token, old_iv
"#;

const REPLACE_CREDENTIAL: &str = r#"
UPDATE oauth_credentials SET
    old_encrypted_token = encrypted_token,
    old_iv = iv,
    encrypted_token = ?,
    encrypted_refresh_token = ?,
    iv = ?,
    refresh_iv = ?,
    expires_at = ?,
    updated_at = ?
WHERE user_id = ?
RETURNING old_encrypted_token, old_iv
"#;

const CLEAR_HANDOFF: &str = r#"
UPDATE oauth_credentials SET old_encrypted_token = NULL, old_iv = NULL
WHERE user_id = ?
"#;

async fn clear_handoff(conn: &mut SqliteConnection, user_id: &str) -> AppResult<()> {
    sqlx::query(CLEAR_HANDOFF)
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Values about to be written, already encrypted
struct SealedGrant {
    token: Vec<u8>,
    refresh_token: Vec<u8>,
    iv: Vec<u8>,
    refresh_iv: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    pool: DbPool,
    cipher: Arc<SecretCipher>,
}

impl CredentialStore {
    pub fn new(pool: DbPool, cipher: Arc<SecretCipher>) -> Self {
        Self { pool, cipher }
    }

    /// Fetch and decrypt the credential for a subject
    pub async fn get(&self, user_id: &str) -> AppResult<Option<TokenGrant>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT encrypted_token, encrypted_refresh_token, iv, refresh_iv, expires_at
            FROM oauth_credentials
            WHERE user_id = ?
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!("No stored credential for {}", user_id);
            return Ok(None);
        };

        let access_token = self.cipher.decrypt_str(&row.encrypted_token, &row.iv)?;
        let refresh_token = self
            .cipher
            .decrypt_str(&row.encrypted_refresh_token, &row.refresh_iv)?;

        Ok(Some(TokenGrant {
            access_token,
            refresh_token,
            expires_at: row.expires_at,
        }))
    }

    /// Insert or overwrite the credential for a subject.
    ///
    /// Returns the previous access token if one existed and differs from the
    /// new one.
    pub async fn upsert(&self, user_id: &str, grant: &TokenGrant) -> AppResult<Option<String>> {
        let sealed = self.seal(grant)?;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, SupersededRow>(UPSERT_CREDENTIAL)
            .bind(user_id)
            .bind(&sealed.token)
            .bind(&sealed.refresh_token)
            .bind(&sealed.iv)
            .bind(&sealed.refresh_iv)
            .bind(grant.expires_at)
            .bind(Utc::now())
            .fetch_optional(&mut *tx)
            .await?;
        clear_handoff(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok(row.and_then(|row| self.superseded_token(user_id, &grant.access_token, row)))
    }

    /// Overwrite an existing credential after a refresh.
    ///
    /// Same return contract as [`CredentialStore::upsert`]; fails with
    /// `NotFound` if the subject has no row.
    pub async fn replace(&self, user_id: &str, grant: &TokenGrant) -> AppResult<Option<String>> {
        let sealed = self.seal(grant)?;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, SupersededRow>(REPLACE_CREDENTIAL)
            .bind(&sealed.token)
            .bind(&sealed.refresh_token)
            .bind(&sealed.iv)
            .bind(&sealed.refresh_iv)
            .bind(grant.expires_at)
            .bind(Utc::now())
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("credential for {}", user_id)))?;
        clear_handoff(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok(self.superseded_token(user_id, &grant.access_token, row))
    }

    fn seal(&self, grant: &TokenGrant) -> AppResult<SealedGrant> {
        let token = self.cipher.encrypt_str(&grant.access_token)?;
        let refresh = self.cipher.encrypt_str(&grant.refresh_token)?;
        Ok(SealedGrant {
            token: token.ciphertext,
            refresh_token: refresh.ciphertext,
            iv: token.iv,
            refresh_iv: refresh.iv,
        })
    }

    // The new row is already committed here, so a bad old ciphertext is
    // reported and swallowed rather than failing the write.
    fn superseded_token(
        &self,
        user_id: &str,
        new_token: &str,
        row: SupersededRow,
    ) -> Option<String> {
        let (Some(token), Some(iv)) = (row.old_encrypted_token, row.old_iv) else {
            return None;
        };

        match self.cipher.decrypt_str(&token, &iv) {
            Ok(old) if old != new_token => Some(old),
            Ok(_) => None,
            Err(e) => {
                error!(
                    "Could not decrypt superseded token for {}, it will not be revoked: {}",
                    user_id, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cipher::generate_key_base64;
    use crate::db::setup_test_db;
    use chrono::{Duration, SubsecRound};

    fn cipher() -> Arc<SecretCipher> {
        Arc::new(SecretCipher::from_base64(&generate_key_base64()).unwrap())
    }

    fn grant(access: &str, refresh: &str) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at: (Utc::now() + Duration::days(7)).trunc_subsecs(0),
        }
    }

    #[tokio::test]
    async fn test_upsert_new_subject_returns_none() {
        let store = CredentialStore::new(setup_test_db().await, cipher());
        let first = grant("access-1", "refresh-1");

        assert_eq!(store.upsert("user", &first).await.unwrap(), None);
        assert_eq!(store.get("user").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_upsert_returns_superseded_token() {
        let store = CredentialStore::new(setup_test_db().await, cipher());
        let c1 = grant("access-1", "refresh-1");
        let c2 = grant("access-2", "refresh-2");

        store.upsert("user", &c1).await.unwrap();
        let old = store.upsert("user", &c2).await.unwrap();

        assert_eq!(old.as_deref(), Some("access-1"));
        assert_eq!(store.get("user").await.unwrap(), Some(c2));
    }

    #[tokio::test]
    async fn test_upsert_same_token_is_idempotent() {
        let store = CredentialStore::new(setup_test_db().await, cipher());
        let c = grant("access-1", "refresh-1");

        store.upsert("user", &c).await.unwrap();
        assert_eq!(store.upsert("user", &c).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_returns_superseded_token() {
        let store = CredentialStore::new(setup_test_db().await, cipher());
        store.upsert("user", &grant("access-1", "refresh-1")).await.unwrap();

        let refreshed = grant("access-2", "refresh-2");
        let old = store.replace("user", &refreshed).await.unwrap();

        assert_eq!(old.as_deref(), Some("access-1"));
        assert_eq!(store.get("user").await.unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_replace_missing_subject_is_not_found() {
        let store = CredentialStore::new(setup_test_db().await, cipher());
        let result = store.replace("nobody", &grant("a", "r")).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_missing_subject() {
        let store = CredentialStore::new(setup_test_db().await, cipher());
        assert_eq!(store.get("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecryptable_old_value_does_not_fail_write() {
        let pool = setup_test_db().await;
        let old_store = CredentialStore::new(pool.clone(), cipher());
        old_store.upsert("user", &grant("access-1", "refresh-1")).await.unwrap();

        // A rotated key can no longer read the previous row
        let new_store = CredentialStore::new(pool, cipher());
        let c2 = grant("access-2", "refresh-2");
        assert_eq!(new_store.upsert("user", &c2).await.unwrap(), None);
        assert_eq!(new_store.get("user").await.unwrap(), Some(c2));
    }

    #[tokio::test]
    async fn test_get_with_wrong_key_is_decryption_error() {
        let pool = setup_test_db().await;
        CredentialStore::new(pool.clone(), cipher())
            .upsert("user", &grant("access-1", "refresh-1"))
            .await
            .unwrap();

        let result = CredentialStore::new(pool, cipher()).get("user").await;
        assert!(matches!(result, Err(AppError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_plaintext_is_not_stored() {
        let pool = setup_test_db().await;
        let store = CredentialStore::new(pool.clone(), cipher());
        store.upsert("user", &grant("plain-access", "plain-refresh")).await.unwrap();

        let (token, refresh, iv, refresh_iv): (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) =
            sqlx::query_as(
                "SELECT encrypted_token, encrypted_refresh_token, iv, refresh_iv FROM oauth_credentials",
            )
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_ne!(token, b"plain-access");
        assert_ne!(refresh, b"plain-refresh");
        assert_ne!(iv, refresh_iv);
    }

    #[tokio::test]
    async fn test_superseded_ciphertext_not_kept() {
        let pool = setup_test_db().await;
        let store = CredentialStore::new(pool.clone(), cipher());
        store.upsert("user", &grant("a1", "r1")).await.unwrap();
        assert_eq!(
            store.upsert("user", &grant("a2", "r2")).await.unwrap().as_deref(),
            Some("a1")
        );
        assert_eq!(
            store.replace("user", &grant("a3", "r3")).await.unwrap().as_deref(),
            Some("a2")
        );

        let (old_token, old_iv): (Option<Vec<u8>>, Option<Vec<u8>>) =
            sqlx::query_as("SELECT old_encrypted_token, old_iv FROM oauth_credentials")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(old_token, None);
        assert_eq!(old_iv, None);
    }
}
