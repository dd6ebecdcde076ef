use crate::admission::roles::{AuxRole, Role};
use crate::db::{AdmittedUser, AdmittedUserRow, AuxRoleAssignment, AuxRoleRow, DbPool};
use crate::error::AppResult;
use chrono::Utc;

/// Users that have been let in, with the role they were given
#[derive(Debug, Clone)]
pub struct AdmittedUserStore {
    pool: DbPool,
}

impl AdmittedUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a user's role. `added_at` is kept from the first admission.
    pub async fn upsert_user(&self, user_id: &str, role: Role) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO admitted_users (user_id, role, added_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                role = excluded.role,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(role.id())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> AppResult<Option<AdmittedUser>> {
        let row = sqlx::query_as::<_, AdmittedUserRow>(
            "SELECT user_id, role, added_at, updated_at FROM admitted_users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AdmittedUser::try_from).transpose()
    }

    /// Remove a user and their aux roles. Returns whether the user existed.
    pub async fn delete_user(&self, user_id: &str) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM aux_role_assignments WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM admitted_users WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Grant an aux role. Granting one the user already has is a no-op.
    pub async fn add_aux_role(&self, user_id: &str, role: AuxRole) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aux_role_assignments (user_id, aux_role, added_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, aux_role) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role.id())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove_aux_role(&self, user_id: &str, role: AuxRole) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM aux_role_assignments WHERE user_id = ? AND aux_role = ?")
            .bind(user_id)
            .bind(role.id())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_aux_roles(&self, user_id: &str) -> AppResult<Vec<AuxRoleAssignment>> {
        let rows = sqlx::query_as::<_, AuxRoleRow>(
            "SELECT aux_role, added_at FROM aux_role_assignments WHERE user_id = ? ORDER BY added_at, aux_role",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuxRoleAssignment::try_from).collect()
    }
}
