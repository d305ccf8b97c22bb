pub mod config;
pub mod domain;
pub mod errors;
pub mod matching;
pub mod store;

pub use domain::participant::{MatchDetails, Participant, UserId};
pub use domain::scope::{Scope, ScopeKey, ScopeStatus};
pub use errors::{ApplicationError, DomainError};
pub use matching::{MatchingEngine, MatchingError, MatchingOutcome, MatchingReport};
pub use store::{ParticipantStore, StoreError};
