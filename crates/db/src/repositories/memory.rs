use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use santa_core::domain::participant::{MatchDetails, Participant, UserId};
use santa_core::domain::scope::{ScopeKey, ScopeStatus};
use santa_core::store::{ParticipantStore, StoreError, DEFAULT_MATCHING_LEASE};

#[derive(Default)]
struct ScopeEntry {
    status: Option<ScopeStatus>,
    status_since: Option<Instant>,
    participants: Vec<Participant>,
}

impl ScopeEntry {
    fn insert(&mut self, key: &ScopeKey, participant: &Participant) -> Result<(), StoreError> {
        if self.participants.iter().any(|existing| existing.user_id == participant.user_id) {
            return Err(StoreError::conflict(key, &participant.user_id));
        }
        self.participants.push(participant.clone());
        Ok(())
    }

    fn set_status(&mut self, status: ScopeStatus) {
        self.status = Some(status);
        self.status_since = Some(Instant::now());
    }
}

/// Store backed by process memory, used by tests and local runs.
pub struct InMemoryParticipantStore {
    scopes: RwLock<HashMap<ScopeKey, ScopeEntry>>,
    matching_lease: Duration,
}

impl Default for InMemoryParticipantStore {
    fn default() -> Self {
        Self { scopes: RwLock::default(), matching_lease: DEFAULT_MATCHING_LEASE }
    }
}

impl InMemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matching_lease(mut self, lease: Duration) -> Self {
        self.matching_lease = lease;
        self
    }
}

#[async_trait]
impl ParticipantStore for InMemoryParticipantStore {
    async fn count_all(&self, scope: &ScopeKey) -> Result<u64, StoreError> {
        let scopes = self.scopes.read().await;
        Ok(scopes.get(scope).map_or(0, |entry| entry.participants.len() as u64))
    }

    async fn count_matched(&self, scope: &ScopeKey) -> Result<u64, StoreError> {
        let scopes = self.scopes.read().await;
        Ok(scopes.get(scope).map_or(0, |entry| {
            entry.participants.iter().filter(|p| p.is_matched()).count() as u64
        }))
    }

    async fn get_by_id(
        &self,
        scope: &ScopeKey,
        user_id: &UserId,
    ) -> Result<Participant, StoreError> {
        let scopes = self.scopes.read().await;
        scopes
            .get(scope)
            .and_then(|entry| entry.participants.iter().find(|p| &p.user_id == user_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(scope, user_id))
    }

    async fn get_unmatched(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(scope)
            .map(|entry| entry.participants.iter().filter(|p| !p.is_matched()).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_all(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError> {
        let scopes = self.scopes.read().await;
        Ok(scopes.get(scope).map(|entry| entry.participants.clone()).unwrap_or_default())
    }

    async fn register(&self, participant: &Participant) -> Result<(), StoreError> {
        let key = participant.scope.key();
        let mut scopes = self.scopes.write().await;
        scopes.entry(key.clone()).or_default().insert(&key, participant)
    }

    async fn record_match(
        &self,
        scope: &ScopeKey,
        giver: &UserId,
        recipient: &MatchDetails,
    ) -> Result<(), StoreError> {
        let mut scopes = self.scopes.write().await;
        let participant = scopes
            .get_mut(scope)
            .and_then(|entry| entry.participants.iter_mut().find(|p| &p.user_id == giver))
            .ok_or_else(|| StoreError::not_found(scope, giver))?;

        if participant.is_matched() {
            return Err(StoreError::conflict(scope, giver));
        }
        participant.your_match = Some(recipient.clone());
        Ok(())
    }

    async fn scope_status(&self, scope: &ScopeKey) -> Result<Option<ScopeStatus>, StoreError> {
        let scopes = self.scopes.read().await;
        Ok(scopes.get(scope).and_then(|entry| entry.status))
    }

    async fn open_scope(&self, host: &Participant) -> Result<(), StoreError> {
        let key = host.scope.key();
        let mut scopes = self.scopes.write().await;
        let entry = scopes.entry(key.clone()).or_default();
        if entry.status.is_some() {
            return Err(StoreError::ScopeExists { scope_key: key.0 });
        }

        entry.insert(&key, host)?;
        entry.set_status(ScopeStatus::Open);
        Ok(())
    }

    async fn enroll(&self, participant: &Participant) -> Result<(), StoreError> {
        let key = participant.scope.key();
        let mut scopes = self.scopes.write().await;
        let Some(entry) = scopes.get_mut(&key) else {
            return Err(StoreError::ScopeMissing { scope_key: key.0 });
        };

        match entry.status {
            None => Err(StoreError::ScopeMissing { scope_key: key.0 }),
            Some(ScopeStatus::Open) => entry.insert(&key, participant),
            Some(status) => Err(StoreError::ScopeBusy { scope_key: key.0, status }),
        }
    }

    async fn begin_matching(&self, scope: &ScopeKey) -> Result<(), StoreError> {
        let mut scopes = self.scopes.write().await;
        let Some(entry) = scopes.get_mut(scope) else {
            return Err(StoreError::ScopeMissing { scope_key: scope.0.clone() });
        };

        let stale = entry.status_since.is_some_and(|since| since.elapsed() > self.matching_lease);
        match entry.status {
            None => Err(StoreError::ScopeMissing { scope_key: scope.0.clone() }),
            Some(ScopeStatus::Open) => {
                entry.set_status(ScopeStatus::Matching);
                Ok(())
            }
            Some(ScopeStatus::Matching) if stale => {
                entry.set_status(ScopeStatus::Matching);
                Ok(())
            }
            Some(status) => Err(StoreError::ScopeBusy { scope_key: scope.0.clone(), status }),
        }
    }

    async fn finish_matching(&self, scope: &ScopeKey) -> Result<ScopeStatus, StoreError> {
        let mut scopes = self.scopes.write().await;
        let Some(entry) = scopes.get_mut(scope) else {
            return Err(StoreError::ScopeMissing { scope_key: scope.0.clone() });
        };

        match entry.status {
            None => Err(StoreError::ScopeMissing { scope_key: scope.0.clone() }),
            Some(ScopeStatus::Matching) => {
                let complete = entry.participants.iter().all(Participant::is_matched);
                let next = if complete { ScopeStatus::Matched } else { ScopeStatus::Open };
                entry.set_status(next);
                Ok(next)
            }
            Some(status) => Err(StoreError::ScopeBusy { scope_key: scope.0.clone(), status }),
        }
    }
}
