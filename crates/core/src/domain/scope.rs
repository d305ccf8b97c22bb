use std::fmt;

use serde::{Deserialize, Serialize};

const SEGMENT_SEPARATOR: char = '_';

/// Opaque partition key for one Secret Santa exchange.
///
/// Built from `enterprise_team_channel_year`, with any missing segment
/// collapsed to the empty string so that `None` and `Some("")` resolve to
/// the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey(pub String);

impl ScopeKey {
    pub fn resolve(
        enterprise_id: Option<&str>,
        team_id: Option<&str>,
        channel_id: Option<&str>,
        year: i32,
    ) -> Self {
        let mut key = String::new();
        for segment in [enterprise_id, team_id, channel_id] {
            key.push_str(segment.unwrap_or_default());
            key.push(SEGMENT_SEPARATOR);
        }
        key.push_str(&year.to_string());
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical identifiers a scope key is derived from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub enterprise_id: Option<String>,
    pub team_id: Option<String>,
    pub channel_id: Option<String>,
    pub year: i32,
}

impl Scope {
    pub fn new(
        enterprise_id: Option<String>,
        team_id: Option<String>,
        channel_id: Option<String>,
        year: i32,
    ) -> Self {
        Self { enterprise_id, team_id, channel_id, year }
    }

    pub fn key(&self) -> ScopeKey {
        ScopeKey::resolve(
            self.enterprise_id.as_deref(),
            self.team_id.as_deref(),
            self.channel_id.as_deref(),
            self.year,
        )
    }

    /// Channel id for message rendering, empty when Slack omitted it.
    pub fn channel_label(&self) -> &str {
        self.channel_id.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    Open,
    Matching,
    Matched,
}

impl ScopeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Matching => "matching",
            Self::Matched => "matched",
        }
    }
}

impl std::str::FromStr for ScopeStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "matching" => Ok(Self::Matching),
            "matched" => Ok(Self::Matched),
            other => Err(format!("unknown scope status `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Scope, ScopeKey, ScopeStatus};

    #[test]
    fn missing_segments_resolve_like_empty_segments() {
        assert_eq!(
            ScopeKey::resolve(None, Some("T1"), Some("C1"), 2024),
            ScopeKey::resolve(Some(""), Some("T1"), Some("C1"), 2024)
        );
    }

    #[test]
    fn segments_are_joined_in_enterprise_team_channel_year_order() {
        let key = ScopeKey::resolve(Some("E1"), Some("T1"), Some("C1"), 2024);
        assert_eq!(key.as_str(), "E1_T1_C1_2024");

        let key = ScopeKey::resolve(None, None, None, 2025);
        assert_eq!(key.as_str(), "___2025");
    }

    #[test]
    fn scope_key_changes_with_year() {
        let this_year = Scope::new(None, Some("T1".into()), Some("C1".into()), 2024);
        let next_year = Scope { year: 2025, ..this_year.clone() };
        assert_ne!(this_year.key(), next_year.key());
    }

    #[test]
    fn scope_status_round_trips_through_storage_labels() {
        for status in [ScopeStatus::Open, ScopeStatus::Matching, ScopeStatus::Matched] {
            assert_eq!(status.as_str().parse::<ScopeStatus>(), Ok(status));
        }
        assert!("closed".parse::<ScopeStatus>().is_err());
    }
}
