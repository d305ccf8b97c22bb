//! Participant Store contract.
//!
//! Every operation is scoped by a [`ScopeKey`]. Implementations live in
//! `santa-db` (SQLite and in-memory). The scope-level writes
//! (`open_scope`, `enroll`, `begin_matching`, `finish_matching`) are atomic
//! so that concurrent commands against one scope cannot race past each
//! other's preconditions.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::participant::{MatchDetails, Participant, UserId};
use crate::domain::scope::{ScopeKey, ScopeStatus};

/// How long a scope may stay in `matching` before a new run may take it over.
pub const DEFAULT_MATCHING_LEASE: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("participant `{user_id}` not found in scope `{scope_key}`")]
    NotFound { scope_key: String, user_id: String },
    #[error("participant `{user_id}` already recorded in scope `{scope_key}`")]
    Conflict { scope_key: String, user_id: String },
    #[error("scope `{scope_key}` already exists")]
    ScopeExists { scope_key: String },
    #[error("scope `{scope_key}` does not exist")]
    ScopeMissing { scope_key: String },
    #[error("scope `{scope_key}` is {status:?}")]
    ScopeBusy { scope_key: String, status: ScopeStatus },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn not_found(scope: &ScopeKey, user_id: &UserId) -> Self {
        Self::NotFound { scope_key: scope.0.clone(), user_id: user_id.0.clone() }
    }

    pub fn conflict(scope: &ScopeKey, user_id: &UserId) -> Self {
        Self::Conflict { scope_key: scope.0.clone(), user_id: user_id.0.clone() }
    }
}

#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Total participants in the scope; zero means the scope was never initialized.
    async fn count_all(&self, scope: &ScopeKey) -> Result<u64, StoreError>;

    async fn count_matched(&self, scope: &ScopeKey) -> Result<u64, StoreError>;

    async fn get_by_id(&self, scope: &ScopeKey, user_id: &UserId)
        -> Result<Participant, StoreError>;

    async fn get_unmatched(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError>;

    async fn get_all(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError>;

    /// Inserts a participant under `participant.scope.key()`.
    /// Fails with [`StoreError::Conflict`] when the user id is already present.
    async fn register(&self, participant: &Participant) -> Result<(), StoreError>;

    /// Marks `giver` as matched with `recipient`. Fails with
    /// [`StoreError::NotFound`] for an unknown giver and [`StoreError::Conflict`]
    /// when the giver already holds a match.
    async fn record_match(
        &self,
        scope: &ScopeKey,
        giver: &UserId,
        recipient: &MatchDetails,
    ) -> Result<(), StoreError>;

    async fn scope_status(&self, scope: &ScopeKey) -> Result<Option<ScopeStatus>, StoreError>;

    /// Creates the scope with `host` as its first and only host participant.
    async fn open_scope(&self, host: &Participant) -> Result<(), StoreError>;

    /// Registers a participant only while its scope is `open`. A missing scope
    /// fails with [`StoreError::ScopeMissing`], a `matching` or `matched` one
    /// with [`StoreError::ScopeBusy`].
    async fn enroll(&self, participant: &Participant) -> Result<(), StoreError>;

    /// Moves an `open` scope to `matching`. A `matching` scope whose lease has
    /// expired is taken over; any other state is rejected.
    async fn begin_matching(&self, scope: &ScopeKey) -> Result<(), StoreError>;

    /// Leaves `matching`: `matched` when nobody is left unmatched, `open` otherwise.
    async fn finish_matching(&self, scope: &ScopeKey) -> Result<ScopeStatus, StoreError>;
}
