//! Moderator-driven admission of users waiting in the holding channel.
//!
//! Guild side effects happen only after the store reports that this caller
//! closed the pending admission. Losing callers do nothing.

pub mod cache;
pub mod guild;
pub mod roles;

pub use cache::AdmittedUserCache;
pub use guild::{AuditEntry, Decision, GuildGateway};
pub use roles::{AuxRole, Role, RoleIds};

use crate::auth::DiscordUser;
use crate::db::{AdmissionDecision, AdmissionStore, CloseOutcome};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a finalize call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted(AdmissionDecision),
    Kicked,
    Banned,
    /// No primary role has been staged by this interactor
    NotReady,
    /// The target is no longer in the guild; the admission stays open
    Departed,
    /// Someone else already closed the admission
    RaceLost,
}

pub struct AdmissionCoordinator {
    store: AdmissionStore,
    guild: Arc<dyn GuildGateway>,
    admitted: Arc<AdmittedUserCache>,
    roles: RoleIds,
}

impl std::fmt::Debug for AdmissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionCoordinator")
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl AdmissionCoordinator {
    pub fn new(
        store: AdmissionStore,
        guild: Arc<dyn GuildGateway>,
        admitted: Arc<AdmittedUserCache>,
        roles: RoleIds,
    ) -> Self {
        Self {
            store,
            guild,
            admitted,
            roles,
        }
    }

    pub fn admitted(&self) -> &Arc<AdmittedUserCache> {
        &self.admitted
    }

    /// Open an admission for a user who just joined, posting the moderator
    /// notice. Returns the notice's message id.
    pub async fn register_pending(&self, user: &DiscordUser) -> AppResult<String> {
        if let Some(message_id) = self.store.get_action_message(&user.id).await? {
            debug!("Admission for {} already pending", user.id);
            return Ok(message_id);
        }

        let message_id = self.guild.announce_pending(user).await?;
        match self.store.insert_action_message(&user.id, &message_id).await {
            Ok(()) => {
                info!("Registered pending admission for {}", user.id);
                Ok(message_id)
            }
            Err(AppError::Conflict(_)) => {
                // A concurrent join registered first; keep its notice
                self.retract(&message_id).await;
                self.store
                    .get_action_message(&user.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("pending admission for {}", user.id)))
            }
            Err(e) => {
                self.retract(&message_id).await;
                Err(e)
            }
        }
    }

    pub async fn stage_role(&self, target: &str, interactor: &str, role: Role) -> AppResult<()> {
        if !self.admitted.is_permitted(interactor, role).await? {
            return Err(AppError::Forbidden(format!(
                "{} may not grant {}",
                interactor, role
            )));
        }
        self.store.set_role(target, interactor, role).await
    }

    pub async fn stage_aux_roles(
        &self,
        target: &str,
        interactor: &str,
        roles: &[AuxRole],
    ) -> AppResult<()> {
        self.require_member(interactor).await?;
        self.store.set_aux_roles(target, interactor, roles).await
    }

    /// Finalize with the interactor's staged roles
    pub async fn accept(&self, target: &str, interactor: &str) -> AppResult<AdmissionOutcome> {
        self.require_member(interactor).await?;

        if !self.guild.is_member(target).await? {
            debug!("{} left before being admitted", target);
            return Ok(AdmissionOutcome::Departed);
        }

        let (decision, message_id) = match self.store.validate_and_end(target, interactor).await? {
            CloseOutcome::Closed {
                decision,
                message_id,
            } => (decision, message_id),
            CloseOutcome::NotReady => return Ok(AdmissionOutcome::NotReady),
            CloseOutcome::RaceLost => return Ok(AdmissionOutcome::RaceLost),
        };

        // The admission is closed either way, so the notice goes too
        let applied = self.apply_admission(target, &decision).await;
        self.retract(&message_id).await;
        if let Err(e) = applied {
            error!("Closed admission of {} but failed to apply roles: {}", target, e);
            return Err(e);
        }

        self.audit(
            target,
            interactor,
            Decision::Admitted {
                role: decision.role,
                aux_roles: decision.aux_roles.clone(),
            },
        )
        .await;

        info!("{} admitted {} as {}", interactor, target, decision.role);
        Ok(AdmissionOutcome::Admitted(decision))
    }

    async fn apply_admission(&self, target: &str, decision: &AdmissionDecision) -> AppResult<()> {
        self.guild
            .add_role(target, self.roles.role(decision.role))
            .await?;
        for aux in &decision.aux_roles {
            self.guild.add_role(target, self.roles.aux_role(*aux)).await?;
        }
        self.admitted
            .record_admission(target, decision.role, &decision.aux_roles)
            .await
    }

    /// Close without admitting and kick the user
    pub async fn ignore(&self, target: &str, interactor: &str) -> AppResult<AdmissionOutcome> {
        self.require_member(interactor).await?;

        let Some(message_id) = self.store.end(target).await? else {
            return Ok(AdmissionOutcome::RaceLost);
        };

        let kicked = match self.guild.is_member(target).await {
            Ok(true) => {
                self.guild
                    .kick_user(target, &format!("admission ignored by {}", interactor))
                    .await
            }
            Ok(false) => {
                debug!("{} already left, nothing to kick", target);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.retract(&message_id).await;
        kicked?;

        info!("{} ignored admission of {}", interactor, target);
        Ok(AdmissionOutcome::Kicked)
    }

    /// Close without admitting and ban the user
    pub async fn ban(&self, target: &str, interactor: &str) -> AppResult<AdmissionOutcome> {
        if !self.admitted.is_moderator(interactor).await? {
            return Err(AppError::Forbidden(format!("{} is not a moderator", interactor)));
        }

        let Some(message_id) = self.store.end(target).await? else {
            return Ok(AdmissionOutcome::RaceLost);
        };

        let banned = self
            .guild
            .ban_user(target, &format!("admission banned by {}", interactor))
            .await;
        self.retract(&message_id).await;
        banned?;

        self.admitted.remove(target).await?;
        self.audit(target, interactor, Decision::Banned).await;

        info!("{} banned {}", interactor, target);
        Ok(AdmissionOutcome::Banned)
    }

    /// Must be able to grant at least the lowest role
    async fn require_member(&self, interactor: &str) -> AppResult<()> {
        if self.admitted.is_permitted(interactor, Role::Guest).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} may not manage admissions",
                interactor
            )))
        }
    }

    async fn audit(&self, target: &str, actor: &str, decision: Decision) {
        let entry = AuditEntry {
            target: target.to_string(),
            actor: actor.to_string(),
            decision,
            at: Utc::now(),
        };
        if let Err(e) = self.guild.announce_decision(&entry).await {
            warn!("Failed to log decision on {}: {}", target, e);
        }
    }

    async fn retract(&self, message_id: &str) {
        if let Err(e) = self.guild.retract_announcement(message_id).await {
            warn!("Failed to delete pending notice {}: {}", message_id, e);
        }
    }
}
