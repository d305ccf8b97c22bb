use serde::{Deserialize, Serialize};

use crate::domain::scope::Scope;
use crate::errors::DomainError;

/// Shortest postal address accepted on `/initialize` and `/participate`.
pub const MIN_ADDRESS_LEN: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The recipient half of a recorded match, copied onto the giver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub user_id: UserId,
    pub user_name: String,
    pub address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub scope: Scope,
    pub user_id: UserId,
    pub user_name: String,
    pub address: Option<String>,
    pub is_host: bool,
    pub response_url: String,
    pub your_match: Option<MatchDetails>,
}

impl Participant {
    pub fn new(
        scope: Scope,
        user_id: UserId,
        user_name: impl Into<String>,
        address: impl Into<String>,
        response_url: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            user_id,
            user_name: user_name.into(),
            address: Some(address.into()),
            is_host: false,
            response_url: response_url.into(),
            your_match: None,
        }
    }

    pub fn as_host(mut self) -> Self {
        self.is_host = true;
        self
    }

    pub fn is_matched(&self) -> bool {
        self.your_match.is_some()
    }

    pub fn match_details(&self) -> MatchDetails {
        MatchDetails {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            address: self.address.clone(),
        }
    }
}

/// Normalizes the free text of a join command into a postal address.
pub fn validate_address(text: Option<&str>) -> Result<String, DomainError> {
    let address = text.map(str::trim).unwrap_or_default();
    if address.chars().count() < MIN_ADDRESS_LEN {
        return Err(DomainError::Validation(
            "Please provide a valid postal address by typing it after the command".to_owned(),
        ));
    }
    Ok(address.to_owned())
}
