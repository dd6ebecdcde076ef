use crate::config::RolesConfig;
use crate::error::{AppError, AppResult};
use serde::Serialize;

/// Membership tier. Ordered: a higher tier outranks a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Role {
    Guest,
    Member,
    Moderator,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Guest, Role::Member, Role::Moderator];

    /// Stable id used in storage and component values
    pub fn id(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Member => "member",
            Self::Moderator => "mod",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "guest" => Some(Self::Guest),
            "member" => Some(Self::Member),
            "mod" => Some(Self::Moderator),
            _ => None,
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            Self::Guest => "Guest",
            Self::Member => "Member",
            Self::Moderator => "Moderator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

/// Supplementary roles granted alongside the primary one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuxRole {
    Irl,
    Work,
}

/// Separator for aux-role lists in storage
const AUX_SEPARATOR: char = '\0';

impl AuxRole {
    pub const ALL: [AuxRole; 2] = [AuxRole::Irl, AuxRole::Work];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Irl => "irl",
            Self::Work => "work",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "irl" => Some(Self::Irl),
            "work" => Some(Self::Work),
            _ => None,
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            Self::Irl => "IRL",
            Self::Work => "Work",
        }
    }

    pub fn encode_list(roles: &[AuxRole]) -> String {
        roles
            .iter()
            .map(AuxRole::id)
            .collect::<Vec<_>>()
            .join(&AUX_SEPARATOR.to_string())
    }

    pub fn decode_list(data: &str) -> AppResult<Vec<AuxRole>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        data.split(AUX_SEPARATOR)
            .map(|id| {
                AuxRole::from_id(id)
                    .ok_or_else(|| AppError::decode(format!("unknown aux role id {:?}", id)))
            })
            .collect()
    }
}

/// Discord role ids for each role
#[derive(Debug, Clone)]
pub struct RoleIds {
    guest: String,
    member: String,
    moderator: String,
    irl: String,
    work: String,
}

impl RoleIds {
    pub fn role(&self, role: Role) -> &str {
        match role {
            Role::Guest => &self.guest,
            Role::Member => &self.member,
            Role::Moderator => &self.moderator,
        }
    }

    pub fn aux_role(&self, role: AuxRole) -> &str {
        match role {
            AuxRole::Irl => &self.irl,
            AuxRole::Work => &self.work,
        }
    }

    /// Reverse lookup from a Discord role id
    pub fn role_for_id(&self, id: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| self.role(*r) == id)
    }
}

impl From<&RolesConfig> for RoleIds {
    fn from(config: &RolesConfig) -> Self {
        Self {
            guest: config.guest.clone(),
            member: config.member.clone(),
            moderator: config.moderator.clone(),
            irl: config.irl.clone(),
            work: config.work.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ids_roundtrip() {
        for role in Role::ALL {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id("moderator"), None);
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Guest < Role::Member);
        assert!(Role::Member < Role::Moderator);
    }

    #[test]
    fn test_aux_list_encoding() {
        assert_eq!(AuxRole::encode_list(&[]), "");
        assert_eq!(AuxRole::encode_list(&[AuxRole::Irl, AuxRole::Work]), "irl\0work");
        assert_eq!(AuxRole::decode_list("").unwrap(), vec![]);
        assert_eq!(AuxRole::decode_list("work").unwrap(), vec![AuxRole::Work]);
    }

    #[test]
    fn test_aux_list_unknown_id() {
        assert!(matches!(
            AuxRole::decode_list("irl\0golf"),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn test_role_id_lookup() {
        let ids = RoleIds::from(&RolesConfig {
            guest: "10".to_string(),
            member: "20".to_string(),
            moderator: "30".to_string(),
            irl: "40".to_string(),
            work: "50".to_string(),
        });
        assert_eq!(ids.role(Role::Member), "20");
        assert_eq!(ids.aux_role(AuxRole::Work), "50");
        assert_eq!(ids.role_for_id("30"), Some(Role::Moderator));
        assert_eq!(ids.role_for_id("40"), None);
    }
}
