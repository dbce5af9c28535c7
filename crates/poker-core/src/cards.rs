use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{CardId, ListId};

/// A card offered for estimation, as reported by the card source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub card_id: CardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub story_points: Option<f64>,
}

impl Card {
    /// A card counts as estimated once it carries a positive story-point value.
    pub fn is_estimated(&self) -> bool {
        self.story_points.is_some_and(|p| p > 0.0)
    }

    pub fn summary(&self) -> CardSummary {
        CardSummary {
            card_id: self.card_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Display data for the card currently up for estimation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSummary {
    pub card_id: CardId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum CardSourceError {
    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("card not found: {0}")]
    CardNotFound(String),

    #[error("card source unavailable: {0}")]
    Unavailable(String),
}

/// Read access to candidate cards plus the single story-point write-back.
///
/// Implemented outside the coordinator (SQLite store, board service client,
/// in-memory fixture).
#[async_trait]
pub trait CardSource: Send + Sync {
    /// Cards of a list in the order they should be offered.
    async fn list_candidates(&self, list_id: &ListId) -> Result<Vec<Card>, CardSourceError>;

    async fn set_story_points(&self, card_id: &CardId, points: f64) -> Result<(), CardSourceError>;
}
