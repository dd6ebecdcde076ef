pub mod handler;

use crate::admission::{AdmissionCoordinator, AuditEntry, AuxRole, Decision, GuildGateway, Role};
use crate::auth::DiscordUser;
use crate::config::DiscordConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use handler::AdmissionAction;
use poise::serenity_prelude::{
    self as serenity, AddMember, ButtonStyle, ChannelId, CreateActionRow, CreateButton,
    CreateEmbed, CreateMessage, CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption,
    FullEvent, GatewayIntents, GuildId, Http, Interaction, MessageId, RoleId, UserId,
};
use std::sync::Arc;
use tracing::{debug, error, info};

const GREEN: u32 = 0x57F287;
const RED: u32 = 0xED4245;

/// Shared data accessible in all handlers
#[derive(Debug)]
pub struct Data {
    pub coordinator: Arc<AdmissionCoordinator>,
}

type Error = Box<dyn std::error::Error + Send + Sync>;

/// Parse a Discord snowflake, rejecting anything that is not a non-zero u64
fn snowflake(raw: &str) -> AppResult<u64> {
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::validation(format!("invalid snowflake {:?}", raw))),
    }
}

/// Guild side effects over the Discord REST API
pub struct SerenityGuild {
    http: Arc<Http>,
    guild_id: GuildId,
    pending_channel: ChannelId,
    log_channel: ChannelId,
    moderator_role: String,
}

impl std::fmt::Debug for SerenityGuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerenityGuild")
            .field("guild_id", &self.guild_id)
            .field("pending_channel", &self.pending_channel)
            .finish_non_exhaustive()
    }
}

impl SerenityGuild {
    pub fn new(http: Arc<Http>, config: &DiscordConfig, moderator_role: &str) -> AppResult<Self> {
        Ok(Self {
            http,
            guild_id: GuildId::new(snowflake(&config.guild_id)?),
            pending_channel: ChannelId::new(snowflake(&config.pending_channel_id)?),
            log_channel: ChannelId::new(snowflake(&config.log_channel_id)?),
            moderator_role: moderator_role.to_string(),
        })
    }
}

/// Moderator notice for a user waiting to be let in
fn pending_notice(user: &DiscordUser, moderator_role: &str) -> CreateMessage {
    let embed = CreateEmbed::new()
        .title("A new user has joined")
        .description("What would you like to do?")
        .field("Profile", format!("<@{}>", user.id), false)
        .field("Name", user.display_name(), false);

    let buttons = vec![
        CreateButton::new(AdmissionAction::Accept.custom_id(&user.id))
            .label("Accept")
            .style(ButtonStyle::Success)
            .emoji('✅'),
        CreateButton::new(AdmissionAction::Ignore.custom_id(&user.id))
            .label("Ignore")
            .style(ButtonStyle::Secondary)
            .emoji('😔'),
        CreateButton::new(AdmissionAction::Ban.custom_id(&user.id))
            .label("Ban")
            .style(ButtonStyle::Danger)
            .emoji('🚫'),
    ];

    let role_options = Role::ALL
        .iter()
        .map(|r| CreateSelectMenuOption::new(r.friendly_name(), r.id()))
        .collect();
    let role_select = CreateSelectMenu::new(
        AdmissionAction::SelectRole.custom_id(&user.id),
        CreateSelectMenuKind::String {
            options: role_options,
        },
    )
    .placeholder("Select a role")
    .min_values(1)
    .max_values(1);

    let aux_options = AuxRole::ALL
        .iter()
        .map(|r| CreateSelectMenuOption::new(r.friendly_name(), r.id()))
        .collect();
    let aux_select = CreateSelectMenu::new(
        AdmissionAction::SelectAuxRoles.custom_id(&user.id),
        CreateSelectMenuKind::String {
            options: aux_options,
        },
    )
    .placeholder("Apply extra roles?")
    .min_values(0)
    .max_values(AuxRole::ALL.len() as u8);

    CreateMessage::new()
        .content(format!("<@&{}>", moderator_role))
        .embed(embed)
        .components(vec![
            CreateActionRow::SelectMenu(role_select),
            CreateActionRow::SelectMenu(aux_select),
            CreateActionRow::Buttons(buttons),
        ])
}

/// Log-channel record of a finalized decision
fn decision_notice(entry: &AuditEntry, moderator_role: &str) -> CreateMessage {
    let when = format!("<t:{}:R>", entry.at.timestamp());
    let embed = match &entry.decision {
        Decision::Admitted { role, aux_roles } => {
            let extras = if aux_roles.is_empty() {
                "None".to_string()
            } else {
                aux_roles
                    .iter()
                    .map(|r| format!("- {}", r.friendly_name()))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            CreateEmbed::new()
                .title("User admitted")
                .colour(GREEN)
                .field("Admitted by", format!("<@{}>", entry.actor), false)
                .field("Role", role.friendly_name(), false)
                .field("Extra roles", extras, false)
                .field("Admitted", when, false)
        }
        Decision::Banned => CreateEmbed::new()
            .title("User banned")
            .colour(RED)
            .field("Banned by", format!("<@{}>", entry.actor), false)
            .field("Banned", when, false),
    };

    CreateMessage::new()
        .content(format!("<@&{}>", moderator_role))
        .embed(embed.description(format!("<@{}>", entry.target)))
}

#[async_trait]
impl GuildGateway for SerenityGuild {
    async fn is_member(&self, user_id: &str) -> AppResult<bool> {
        let user = UserId::new(snowflake(user_id)?);
        match self.http.get_member(self.guild_id, user).await {
            Ok(_) => Ok(true),
            Err(serenity::Error::Http(e)) if e.status_code().map(|s| s.as_u16()) == Some(404) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn add_role(&self, user_id: &str, role_id: &str) -> AppResult<()> {
        self.http
            .add_member_role(
                self.guild_id,
                UserId::new(snowflake(user_id)?),
                RoleId::new(snowflake(role_id)?),
                Some("admitted"),
            )
            .await?;
        Ok(())
    }

    async fn ban_user(&self, user_id: &str, reason: &str) -> AppResult<()> {
        self.http
            .ban_user(self.guild_id, UserId::new(snowflake(user_id)?), 0, Some(reason))
            .await?;
        Ok(())
    }

    async fn kick_user(&self, user_id: &str, reason: &str) -> AppResult<()> {
        self.http
            .kick_member(self.guild_id, UserId::new(snowflake(user_id)?), Some(reason))
            .await?;
        Ok(())
    }

    async fn join_guild(&self, user_id: &str, access_token: &str) -> AppResult<()> {
        let member = self
            .guild_id
            .add_member(
                &*self.http,
                UserId::new(snowflake(user_id)?),
                AddMember::new(access_token.to_string()),
            )
            .await?;

        if member.is_none() {
            debug!("{} was already a guild member", user_id);
        }
        Ok(())
    }

    async fn announce_pending(&self, user: &DiscordUser) -> AppResult<String> {
        let message = self
            .pending_channel
            .send_message(&*self.http, pending_notice(user, &self.moderator_role))
            .await?;
        Ok(message.id.to_string())
    }

    async fn retract_announcement(&self, message_id: &str) -> AppResult<()> {
        self.http
            .delete_message(
                self.pending_channel,
                MessageId::new(snowflake(message_id)?),
                None,
            )
            .await?;
        Ok(())
    }

    async fn announce_decision(&self, entry: &AuditEntry) -> AppResult<()> {
        self.log_channel
            .send_message(&*self.http, decision_notice(entry, &self.moderator_role))
            .await?;
        Ok(())
    }
}

/// Event handler for Discord events
async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!("Bot is ready! Logged in as {}", data_about_bot.user.name);
        }
        FullEvent::InteractionCreate {
            interaction: Interaction::Component(component),
        } => {
            handler::handle_component(ctx, component, &data.coordinator).await;
        }
        _ => {}
    }
    Ok(())
}

/// Create and configure the Discord bot framework
pub fn create_framework(coordinator: Arc<AdmissionCoordinator>) -> poise::Framework<Data, Error> {
    poise::Framework::builder()
        .options(poise::FrameworkOptions {
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Setup { error, .. } => {
                            error!("Setup error: {}", error);
                        }
                        poise::FrameworkError::EventHandler { error, event, .. } => {
                            error!("Error handling {}: {}", event.snake_case_name(), error);
                        }
                        err => {
                            error!("Framework error: {:?}", err);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |_ctx, _ready, _framework| Box::pin(async move { Ok(Data { coordinator }) }))
        .build()
}

/// Connect to the gateway and run until the client stops
pub async fn start_bot(token: &str, coordinator: Arc<AdmissionCoordinator>) -> Result<(), Error> {
    if token.is_empty() {
        return Err("Discord token is empty".into());
    }

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS;
    let framework = create_framework(coordinator);

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting Discord bot...");
    client.start().await?;

    Ok(())
}
