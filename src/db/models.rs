use crate::admission::roles::{AuxRole, Role};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Plaintext OAuth credential for one subject.
///
/// Only ever held in memory; the stored form is [`CredentialRow`].
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Encrypted credential as stored in `oauth_credentials`
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub encrypted_token: Vec<u8>,
    pub encrypted_refresh_token: Vec<u8>,
    pub iv: Vec<u8>,
    pub refresh_iv: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Access token a write just replaced, still encrypted
#[derive(Debug, Clone, FromRow)]
pub struct SupersededRow {
    pub old_encrypted_token: Option<Vec<u8>>,
    pub old_iv: Option<Vec<u8>>,
}

/// Consumed anti-CSRF state
#[derive(Debug, Clone, FromRow)]
pub struct StateRow {
    pub expires_at: DateTime<Utc>,
}

/// Pending admission record
#[derive(Debug, Clone, FromRow)]
pub struct PendingRow {
    pub message_id: String,
}

/// One moderator's staged selection, joined against its pending record
#[derive(Debug, Clone, FromRow)]
pub struct InteractionStateRow {
    pub role_raw: Option<String>,
    pub aux_roles_raw: Option<String>,
}

impl InteractionStateRow {
    /// Decode the staged selection. `None` if no primary role was chosen yet.
    pub fn decode(&self) -> AppResult<Option<AdmissionDecision>> {
        let Some(role_raw) = self.role_raw.as_deref() else {
            return Ok(None);
        };
        let role = Role::from_id(role_raw)
            .ok_or_else(|| AppError::decode(format!("unknown role id {:?}", role_raw)))?;
        let aux_roles = AuxRole::decode_list(self.aux_roles_raw.as_deref().unwrap_or(""))?;
        Ok(Some(AdmissionDecision { role, aux_roles }))
    }
}

/// Roles a moderator committed for a pending user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub role: Role,
    pub aux_roles: Vec<AuxRole>,
}

/// Admitted user as stored in `admitted_users`
#[derive(Debug, Clone, FromRow)]
pub struct AdmittedUserRow {
    pub user_id: String,
    pub role: String,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aux role assignment as stored in `aux_role_assignments`
#[derive(Debug, Clone, FromRow)]
pub struct AuxRoleRow {
    pub aux_role: String,
    pub added_at: DateTime<Utc>,
}

/// An admitted user with a decoded role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmittedUser {
    pub user_id: String,
    pub role: Role,
    pub added_at: DateTime<Utc>,
    pub role_updated_at: DateTime<Utc>,
}

impl TryFrom<AdmittedUserRow> for AdmittedUser {
    type Error = AppError;

    fn try_from(row: AdmittedUserRow) -> AppResult<Self> {
        let role = Role::from_id(&row.role)
            .ok_or_else(|| AppError::decode(format!("unknown role id {:?}", row.role)))?;
        Ok(Self {
            user_id: row.user_id,
            role,
            added_at: row.added_at,
            role_updated_at: row.updated_at,
        })
    }
}

/// A decoded aux role assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxRoleAssignment {
    pub role: AuxRole,
    pub added_at: DateTime<Utc>,
}

impl TryFrom<AuxRoleRow> for AuxRoleAssignment {
    type Error = AppError;

    fn try_from(row: AuxRoleRow) -> AppResult<Self> {
        let role = AuxRole::from_id(&row.aux_role)
            .ok_or_else(|| AppError::decode(format!("unknown aux role id {:?}", row.aux_role)))?;
        Ok(Self {
            role,
            added_at: row.added_at,
        })
    }
}
