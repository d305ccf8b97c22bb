use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use santa_core::domain::participant::UserId;
use santa_core::domain::scope::Scope;
use santa_core::errors::ApplicationError;

use crate::messages::{self, SlackMessage};

/// Form fields Slack posts for every slash command.
///
/// Only the caller identity and `response_url` are always present; every other
/// field is optional and empty strings are treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SlashCommandPayload {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub enterprise_id: Option<String>,
    #[serde(default)]
    pub enterprise_name: Option<String>,
    #[serde(default)]
    pub response_url: String,
    #[serde(default)]
    pub team_domain: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SantaCommand {
    Get,
    Initialize,
    Participate,
    Randomize,
}

impl SantaCommand {
    pub const ALL: [SantaCommand; 4] =
        [Self::Get, Self::Initialize, Self::Participate, Self::Randomize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Initialize => "initialize",
            Self::Participate => "participate",
            Self::Randomize => "randomize",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::Get => "/get",
            Self::Initialize => "/initialize",
            Self::Participate => "/participate",
            Self::Randomize => "/randomize",
        }
    }
}

impl fmt::Display for SantaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slash command resolved to its scope and caller, ready for a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: SantaCommand,
    pub scope: Scope,
    pub user_id: UserId,
    pub user_name: String,
    pub text: Option<String>,
    pub response_url: String,
    pub correlation_id: String,
}

pub fn normalize_santa_command(
    command: SantaCommand,
    payload: SlashCommandPayload,
    year: i32,
    correlation_id: impl Into<String>,
) -> CommandEnvelope {
    let scope = Scope::new(
        non_empty(payload.enterprise_id),
        non_empty(payload.team_id),
        non_empty(payload.channel_id),
        year,
    );

    CommandEnvelope {
        command,
        scope,
        user_id: UserId(payload.user_id),
        user_name: payload.user_name,
        text: non_empty(payload.text),
        response_url: payload.response_url,
        correlation_id: correlation_id.into(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|inner| !inner.is_empty())
}

/// What the HTTP layer writes back for a handled command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandReply {
    /// The caller hears back through `response_url`; the reply body is empty.
    Deferred,
    Message(SlackMessage),
}

pub struct CommandRouter<S> {
    service: S,
}

impl<S> CommandRouter<S>
where
    S: SantaCommandService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Dispatches to the service and folds failures into an ephemeral reply.
    pub async fn route(&self, envelope: CommandEnvelope) -> CommandReply {
        let result = match envelope.command {
            SantaCommand::Get => self.service.get_match(&envelope).await,
            SantaCommand::Initialize => self.service.initialize(&envelope).await,
            SantaCommand::Participate => self.service.participate(&envelope).await,
            SantaCommand::Randomize => self.service.randomize(&envelope).await,
        };

        match result {
            Ok(reply) => {
                info!(
                    event_name = "slack.command.handled",
                    correlation_id = %envelope.correlation_id,
                    command = envelope.command.as_str(),
                    scope_key = %envelope.scope.key(),
                    user_id = %envelope.user_id,
                    "slash command handled"
                );
                reply
            }
            Err(error) => {
                warn!(
                    event_name = "slack.command.rejected",
                    correlation_id = %envelope.correlation_id,
                    command = envelope.command.as_str(),
                    scope_key = %envelope.scope.key(),
                    user_id = %envelope.user_id,
                    error_class = error.error_class(),
                    error = %error,
                    "slash command rejected"
                );
                CommandReply::Message(messages::error_message(error.user_message()))
            }
        }
    }
}

#[async_trait]
pub trait SantaCommandService: Send + Sync {
    async fn get_match(&self, envelope: &CommandEnvelope)
        -> Result<CommandReply, ApplicationError>;

    async fn initialize(&self, envelope: &CommandEnvelope)
        -> Result<CommandReply, ApplicationError>;

    async fn participate(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<CommandReply, ApplicationError>;

    async fn randomize(&self, envelope: &CommandEnvelope)
        -> Result<CommandReply, ApplicationError>;
}
