use crate::admission::{AdmissionCoordinator, AdmissionOutcome, AuxRole, Role};
use crate::error::{AppError, AppResult};
use poise::serenity_prelude::{
    self as serenity, ComponentInteraction, ComponentInteractionDataKind,
    CreateInteractionResponse, CreateInteractionResponseMessage,
};
use tracing::{debug, error, warn};

/// Prefix shared by every component on a pending notice
pub const CUSTOM_ID_PREFIX: &str = "admission";

/// What a pending-notice component asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionAction {
    Accept,
    Ignore,
    Ban,
    SelectRole,
    SelectAuxRoles,
}

impl AdmissionAction {
    fn parts(&self) -> (&'static str, &'static str) {
        match self {
            Self::Accept => ("button", "accept"),
            Self::Ignore => ("button", "ignore"),
            Self::Ban => ("button", "ban"),
            Self::SelectRole => ("select", "role"),
            Self::SelectAuxRoles => ("select", "aux"),
        }
    }

    fn from_parts(kind: &str, action: &str) -> Option<Self> {
        match (kind, action) {
            ("button", "accept") => Some(Self::Accept),
            ("button", "ignore") => Some(Self::Ignore),
            ("button", "ban") => Some(Self::Ban),
            ("select", "role") => Some(Self::SelectRole),
            ("select", "aux") => Some(Self::SelectAuxRoles),
            _ => None,
        }
    }

    /// `admission_{button|select}_{action}_{user}`
    pub fn custom_id(&self, target: &str) -> String {
        let (kind, action) = self.parts();
        format!("{}_{}_{}_{}", CUSTOM_ID_PREFIX, kind, action, target)
    }
}

/// A parsed component custom id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRequest {
    pub action: AdmissionAction,
    pub target: String,
}

/// Parse a custom id. `None` if it is not one of ours or is malformed.
pub fn parse_custom_id(custom_id: &str) -> Option<ComponentRequest> {
    let mut parts = custom_id.splitn(4, '_');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let action = AdmissionAction::from_parts(parts.next()?, parts.next()?)?;
    let target = parts.next()?;

    match target.parse::<u64>() {
        Ok(id) if id > 0 => Some(ComponentRequest {
            action,
            target: target.to_string(),
        }),
        _ => None,
    }
}

/// Ephemeral text shown to the moderator. `None` means acknowledge silently.
pub fn outcome_reply(outcome: &AdmissionOutcome, target: &str) -> Option<String> {
    match outcome {
        AdmissionOutcome::Admitted(decision) => {
            let mut reply = format!("Admitted <@{}> as {}", target, decision.role);
            if !decision.aux_roles.is_empty() {
                let extras: Vec<_> = decision.aux_roles.iter().map(|r| r.friendly_name()).collect();
                reply.push_str(&format!(" (+ {})", extras.join(", ")));
            }
            Some(reply)
        }
        AdmissionOutcome::Kicked => Some(format!("Ignored <@{}>", target)),
        AdmissionOutcome::Banned => Some(format!("Banned <@{}>", target)),
        AdmissionOutcome::NotReady => Some("Select a role before accepting".to_string()),
        AdmissionOutcome::Departed => {
            Some("This user could not be found (did they leave?)".to_string())
        }
        AdmissionOutcome::RaceLost => None,
    }
}

fn selected_values(component: &ComponentInteraction) -> &[String] {
    match &component.data.kind {
        ComponentInteractionDataKind::StringSelect { values } => values.as_slice(),
        _ => &[],
    }
}

async fn dispatch(
    coordinator: &AdmissionCoordinator,
    request: &ComponentRequest,
    interactor: &str,
    values: &[String],
) -> AppResult<Option<String>> {
    let target = request.target.as_str();
    match request.action {
        AdmissionAction::SelectRole => {
            let raw = values
                .first()
                .ok_or_else(|| AppError::validation("no role selected"))?;
            let role = Role::from_id(raw)
                .ok_or_else(|| AppError::validation(format!("unknown role {:?}", raw)))?;
            coordinator.stage_role(target, interactor, role).await?;
            Ok(None)
        }
        AdmissionAction::SelectAuxRoles => {
            let roles = values
                .iter()
                .map(|raw| {
                    AuxRole::from_id(raw)
                        .ok_or_else(|| AppError::validation(format!("unknown aux role {:?}", raw)))
                })
                .collect::<AppResult<Vec<_>>>()?;
            coordinator.stage_aux_roles(target, interactor, &roles).await?;
            Ok(None)
        }
        AdmissionAction::Accept => {
            let outcome = coordinator.accept(target, interactor).await?;
            Ok(outcome_reply(&outcome, target))
        }
        AdmissionAction::Ignore => {
            let outcome = coordinator.ignore(target, interactor).await?;
            Ok(outcome_reply(&outcome, target))
        }
        AdmissionAction::Ban => {
            let outcome = coordinator.ban(target, interactor).await?;
            Ok(outcome_reply(&outcome, target))
        }
    }
}

/// Handle a component interaction from a pending notice
pub async fn handle_component(
    ctx: &serenity::Context,
    component: &ComponentInteraction,
    coordinator: &AdmissionCoordinator,
) {
    let Some(request) = parse_custom_id(&component.data.custom_id) else {
        debug!("Ignoring component {}", component.data.custom_id);
        return;
    };

    let interactor = component.user.id.to_string();
    let reply = match dispatch(coordinator, &request, &interactor, selected_values(component)).await
    {
        Ok(reply) => reply,
        Err(AppError::Forbidden(reason)) => {
            warn!("Refused {:?} on {}: {}", request.action, request.target, reason);
            Some("You are not allowed to do that".to_string())
        }
        Err(AppError::Validation(reason)) => Some(format!("Invalid selection: {}", reason)),
        Err(e) => {
            error!("Admission action {:?} on {} failed: {}", request.action, request.target, e);
            Some("Something went wrong, please try again".to_string())
        }
    };

    let response = match reply {
        Some(content) => CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        ),
        None => CreateInteractionResponse::Acknowledge,
    };

    if let Err(e) = component.create_response(&ctx.http, response).await {
        error!("Failed to respond to interaction: {}", e);
    }
}
