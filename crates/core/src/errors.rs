use thiserror::Error;

use crate::matching::MatchingError;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),
    #[error("Secret Santa {year} has not been initialized yet for this Slack channel")]
    NotInitialized { year: i32 },
    #[error("Secret Santa {year} has already been initialized for this Slack channel")]
    AlreadyInitialized { year: i32 },
    #[error("Secret Santa {year} pairs for this Slack channel have already been matched")]
    AlreadyMatched { year: i32 },
    #[error("Secret Santa {year} pairs are already being matched for this Slack channel")]
    MatchingInProgress { year: i32 },
    #[error("You are not the host of this secret santa party, hence cannot randomize pairs")]
    NotHost,
    #[error(
        "Secret Santa {year} pairs have not been matched yet for the Slack channel <#{channel_id}>"
    )]
    NotMatched { year: i32, channel_id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
    #[error("matching failure: {0}")]
    Matching(#[from] MatchingError),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Text safe to echo back to the Slack user who issued the command.
    pub fn user_message(&self) -> String {
        match self {
            Self::Domain(error) => error.to_string(),
            Self::Store(StoreError::NotFound { .. }) => {
                "You are not registered in Secret Santa for this Slack channel".to_owned()
            }
            Self::Store(StoreError::Conflict { .. }) => {
                "You are already registered in Secret Santa for this Slack channel".to_owned()
            }
            Self::Store(_) | Self::Matching(MatchingError::Store(_)) => {
                "Secret Santa storage is temporarily unavailable. Please retry shortly.".to_owned()
            }
            Self::Matching(MatchingError::InsufficientParticipants { .. }) => {
                "Secret Santa needs at least two unmatched participants to randomize pairs"
                    .to_owned()
            }
            Self::Matching(MatchingError::Exhausted { .. }) => {
                "Secret Santa could not draw pairs this time. Please try again.".to_owned()
            }
            Self::Configuration(_) => "An unexpected internal error occurred.".to_owned(),
        }
    }

    /// Stable label for structured logs.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Validation(_)) => "validation",
            Self::Domain(DomainError::NotInitialized { .. }) => "not_initialized",
            Self::Domain(DomainError::AlreadyInitialized { .. }) => "already_initialized",
            Self::Domain(DomainError::AlreadyMatched { .. }) => "already_matched",
            Self::Domain(DomainError::MatchingInProgress { .. }) => "matching_in_progress",
            Self::Domain(DomainError::NotHost) => "not_host",
            Self::Domain(DomainError::NotMatched { .. }) => "not_matched",
            Self::Store(StoreError::NotFound { .. }) => "not_found",
            Self::Store(StoreError::Conflict { .. }) => "conflict",
            Self::Store(_) | Self::Matching(MatchingError::Store(_)) => "store",
            Self::Matching(MatchingError::InsufficientParticipants { .. }) => {
                "insufficient_participants"
            }
            Self::Matching(MatchingError::Exhausted { .. }) => "matching_exhausted",
            Self::Configuration(_) => "configuration",
        }
    }
}
