//! Pending admissions and per-moderator staged role selections.

use crate::admission::roles::{AuxRole, Role};
use crate::db::{AdmissionDecision, DbPool, InteractionStateRow, PendingRow};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use tracing::{debug, warn};

/// Result of trying to close a pending admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This caller closed the admission and owns its side effects
    Closed {
        decision: AdmissionDecision,
        message_id: String,
    },
    /// The interactor has not picked a primary role yet; nothing changed
    NotReady,
    /// Another caller closed the admission first
    RaceLost,
}

impl CloseOutcome {
    pub fn into_decision(self) -> Option<AdmissionDecision> {
        match self {
            Self::Closed { decision, .. } => Some(decision),
            _ => None,
        }
    }
}

const SELECT_STAGED: &str = r#"
SELECT s.primary_role AS role_raw, s.aux_roles AS aux_roles_raw
FROM users_pending_entry p
LEFT JOIN pending_user_interaction_state s
    ON s.target_user_id = p.target_user_id AND s.interactor_id = ?
WHERE p.target_user_id = ?
"#;

#[derive(Debug, Clone)]
pub struct AdmissionStore {
    pool: DbPool,
}

impl AdmissionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Message id of the pending notice for a target, if one is open
    pub async fn get_action_message(&self, target: &str) -> AppResult<Option<String>> {
        let row = sqlx::query_as::<_, PendingRow>(
            "SELECT message_id FROM users_pending_entry WHERE target_user_id = ? LIMIT 1",
        )
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.message_id))
    }

    /// Open a pending admission. A second record for the same target is a `Conflict`.
    pub async fn insert_action_message(&self, target: &str, message_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "INSERT INTO users_pending_entry (target_user_id, message_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(target)
        .bind(message_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
                format!("admission for {} is already pending", target),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_role(&self, target: &str, interactor: &str, role: Role) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_user_interaction_state
                (target_user_id, interactor_id, primary_role, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(target_user_id, interactor_id) DO UPDATE SET
                primary_role = excluded.primary_role,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(target)
        .bind(interactor)
        .bind(role.id())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("{} staged role {} for {}", interactor, role.id(), target);
        Ok(())
    }

    pub async fn set_aux_roles(
        &self,
        target: &str,
        interactor: &str,
        roles: &[AuxRole],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_user_interaction_state
                (target_user_id, interactor_id, aux_roles, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(target_user_id, interactor_id) DO UPDATE SET
                aux_roles = excluded.aux_roles,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(target)
        .bind(interactor)
        .bind(AuxRole::encode_list(roles))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("{} staged {} aux roles for {}", interactor, roles.len(), target);
        Ok(())
    }

    /// Close a pending admission without a role decision.
    ///
    /// Returns the notice's message id if this call removed the record.
    pub async fn end(&self, target: &str) -> AppResult<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PendingRow>(
            "DELETE FROM users_pending_entry WHERE target_user_id = ? RETURNING message_id",
        )
        .bind(target)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pending_user_interaction_state WHERE target_user_id = ?")
            .bind(target)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row.map(|r| r.message_id))
    }

    /// Finalize an admission with the interactor's staged selection.
    ///
    /// Of any number of concurrent calls for the same target at most one
    /// returns `Closed`. The pending record is removed before the staged row
    /// is decoded, so a decode error still leaves the admission closed.
    pub async fn validate_and_end(&self, target: &str, interactor: &str) -> AppResult<CloseOutcome> {
        let staged = sqlx::query_as::<_, InteractionStateRow>(SELECT_STAGED)
            .bind(interactor)
            .bind(target)
            .fetch_optional(&self.pool)
            .await?;

        let Some(staged) = staged else {
            debug!("No pending admission for {}, already closed", target);
            return Ok(CloseOutcome::RaceLost);
        };
        if staged.role_raw.is_none() {
            return Ok(CloseOutcome::NotReady);
        }

        let mut tx = self.pool.begin().await?;

        // Claim the record first so a concurrent closer sees nothing to delete
        let pending = sqlx::query_as::<_, PendingRow>(
            "DELETE FROM users_pending_entry WHERE target_user_id = ? RETURNING message_id",
        )
        .bind(target)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(pending) = pending else {
            tx.rollback().await?;
            debug!("Lost close race for {}", target);
            return Ok(CloseOutcome::RaceLost);
        };

        let reread = sqlx::query_as::<_, InteractionStateRow>(
            r#"
            SELECT primary_role AS role_raw, aux_roles AS aux_roles_raw
            FROM pending_user_interaction_state
            WHERE target_user_id = ? AND interactor_id = ?
            "#,
        )
        .bind(target)
        .bind(interactor)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pending_user_interaction_state WHERE target_user_id = ?")
            .bind(target)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let Some(reread) = reread else {
            warn!("Staged selection for {} vanished while closing", target);
            return Ok(CloseOutcome::RaceLost);
        };

        match reread.decode()? {
            Some(decision) => Ok(CloseOutcome::Closed {
                decision,
                message_id: pending.message_id,
            }),
            None => {
                warn!("Staged role for {} vanished while closing", target);
                Ok(CloseOutcome::RaceLost)
            }
        }
    }
}
