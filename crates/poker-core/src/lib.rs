//! Shared types for the planning poker coordinator: identifiers, the vote
//! deck, session snapshots, the error taxonomy and the two collaborator
//! contracts (card source and snapshot publisher).

pub mod broadcast;
pub mod cards;
pub mod deck;
pub mod errors;
pub mod ids;
pub mod snapshot;

pub use broadcast::{NullPublisher, SessionUpdate, SnapshotPublisher};
pub use cards::{Card, CardSource, CardSourceError, CardSummary};
pub use deck::{DeckError, VoteDeck};
pub use errors::CoordinatorError;
pub use ids::{BoardId, CardId, ListId, ProjectId, SessionId, SessionKey, UserId};
pub use snapshot::{ActionOutcome, ParticipantView, Phase, SessionSnapshot, VoteStats};
