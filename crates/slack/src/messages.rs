use serde::{Deserialize, Serialize};

use santa_core::domain::participant::{MatchDetails, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Ephemeral,
    InChannel,
}

/// Body shape shared by slash-command replies and `response_url` posts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackMessage {
    pub response_type: ResponseType,
    pub text: String,
}

impl SlackMessage {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { response_type: ResponseType::Ephemeral, text: text.into() }
    }

    pub fn in_channel(text: impl Into<String>) -> Self {
        Self { response_type: ResponseType::InChannel, text: text.into() }
    }
}

pub fn match_message(recipient: &MatchDetails) -> SlackMessage {
    let address = recipient.address.as_deref().unwrap_or_default();
    SlackMessage::ephemeral(format!(
        "Your match is <@{}>. Prepare your gift and send it to {address}. Thank you and happy New Year!",
        recipient.user_id
    ))
}

pub fn initialized_message(host: &UserId, year: i32, channel_id: &str) -> SlackMessage {
    SlackMessage::in_channel(format!(
        "<@{host}> just initiated Secret Santa {year} for the Slack channel <#{channel_id}>"
    ))
}

pub fn enrolled_message(user: &UserId, year: i32, channel_id: &str) -> SlackMessage {
    SlackMessage::in_channel(format!(
        "<@{user}> just enrolled in Secret Santa {year} for the Slack channel <#{channel_id}>"
    ))
}

pub fn randomized_message() -> SlackMessage {
    SlackMessage::in_channel("Secret Santa pairs have been randomized!")
}

pub fn error_message(text: impl Into<String>) -> SlackMessage {
    SlackMessage::ephemeral(text)
}
