use crate::admission::roles::{AuxRole, Role};
use crate::auth::DiscordUser;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A finalized moderator decision, posted to the log channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub target: String,
    pub actor: String,
    pub decision: Decision,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted { role: Role, aux_roles: Vec<AuxRole> },
    Banned,
}

/// Guild-side effects of the admission flow
#[async_trait]
pub trait GuildGateway: Send + Sync {
    /// Whether the user is still in the guild
    async fn is_member(&self, user_id: &str) -> AppResult<bool>;

    async fn add_role(&self, user_id: &str, role_id: &str) -> AppResult<()>;

    async fn ban_user(&self, user_id: &str, reason: &str) -> AppResult<()>;

    async fn kick_user(&self, user_id: &str, reason: &str) -> AppResult<()>;

    /// Add a user to the guild on their behalf using their OAuth access token
    async fn join_guild(&self, user_id: &str, access_token: &str) -> AppResult<()>;

    /// Post the moderator notice for a pending user, returning its message id
    async fn announce_pending(&self, user: &DiscordUser) -> AppResult<String>;

    async fn retract_announcement(&self, message_id: &str) -> AppResult<()>;

    async fn announce_decision(&self, entry: &AuditEntry) -> AppResult<()>;
}
