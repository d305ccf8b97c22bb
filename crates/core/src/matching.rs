//! Matching Engine: draws a random derangement over the unmatched
//! participants of a scope and records it through a [`ParticipantStore`].
//!
//! The draw keeps two copies of the pool. Givers are consumed front to back;
//! each giver samples uniformly from the remaining candidates, resampling when
//! it draws itself. If the last giver is left with only itself the whole draw
//! is discarded and redrawn, so every recorded assignment is a permutation
//! without fixed points.

use std::collections::VecDeque;

use rand::Rng;
use thiserror::Error;

use crate::domain::participant::{MatchDetails, Participant, UserId};
use crate::domain::scope::ScopeKey;
use crate::store::{ParticipantStore, StoreError};

pub const DEFAULT_MAX_REDRAWS: u32 = 64;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatchingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("need at least two unmatched participants, found {available}")]
    InsufficientParticipants { available: usize },
    #[error("no valid pairing drawn after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub giver: UserId,
    pub recipient: MatchDetails,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchingOutcome {
    NothingToMatch,
    Matched(MatchingReport),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchingReport {
    pub scope_key: ScopeKey,
    pub assignments: Vec<Assignment>,
    pub redraws: u32,
}

/// Index pairs `(giver, recipient)` into the pool handed to [`draw_pairs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draw {
    pub pairs: Vec<(usize, usize)>,
    pub redraws: u32,
}

pub fn draw_pairs<R>(pool_len: usize, rng: &mut R, max_redraws: u32) -> Result<Draw, MatchingError>
where
    R: Rng + ?Sized,
{
    if pool_len < 2 {
        return Err(MatchingError::InsufficientParticipants { available: pool_len });
    }

    let attempts = max_redraws.max(1);
    for attempt in 0..attempts {
        if let Some(pairs) = draw_once(pool_len, rng) {
            return Ok(Draw { pairs, redraws: attempt });
        }
    }

    Err(MatchingError::Exhausted { attempts })
}

fn draw_once<R>(pool_len: usize, rng: &mut R) -> Option<Vec<(usize, usize)>>
where
    R: Rng + ?Sized,
{
    let mut givers: VecDeque<usize> = (0..pool_len).collect();
    let mut candidates: Vec<usize> = (0..pool_len).collect();
    let mut pairs = Vec::with_capacity(pool_len);

    while let Some(&giver) = givers.front() {
        let index = rng.gen_range(0..candidates.len());
        let candidate = candidates[index];
        if candidate == giver {
            if candidates.len() > 1 {
                continue;
            }
            return None;
        }

        pairs.push((giver, candidate));
        givers.pop_front();
        candidates.remove(index);
    }

    Some(pairs)
}

#[derive(Clone, Debug)]
pub struct MatchingEngine {
    max_redraws: u32,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self { max_redraws: DEFAULT_MAX_REDRAWS }
    }
}

impl MatchingEngine {
    pub fn new(max_redraws: u32) -> Self {
        Self { max_redraws: max_redraws.max(1) }
    }

    /// Pairs every unmatched participant in `scope`.
    ///
    /// Assignments are written one at a time; a store failure stops the run
    /// and leaves the assignments already written in place.
    pub async fn run<R>(
        &self,
        store: &dyn ParticipantStore,
        scope: &ScopeKey,
        rng: &mut R,
    ) -> Result<MatchingOutcome, MatchingError>
    where
        R: Rng + Send + ?Sized,
    {
        let pool = store.get_unmatched(scope).await?;
        if pool.is_empty() {
            return Ok(MatchingOutcome::NothingToMatch);
        }

        let draw = draw_pairs(pool.len(), rng, self.max_redraws)?;
        let assignments = assignments_from(&pool, &draw.pairs);

        for assignment in &assignments {
            store.record_match(scope, &assignment.giver, &assignment.recipient).await?;
        }

        Ok(MatchingOutcome::Matched(MatchingReport {
            scope_key: scope.clone(),
            assignments,
            redraws: draw.redraws,
        }))
    }
}

fn assignments_from(pool: &[Participant], pairs: &[(usize, usize)]) -> Vec<Assignment> {
    pairs
        .iter()
        .map(|&(giver, recipient)| Assignment {
            giver: pool[giver].user_id.clone(),
            recipient: pool[recipient].match_details(),
        })
        .collect()
}
