use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cards::CardSummary;
use crate::ids::{BoardId, CardId, ListId, ProjectId, SessionId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Voting,
    Revealed,
    Closing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voting => write!(f, "voting"),
            Self::Revealed => write!(f, "revealed"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Aggregate statistics over the votes of current voters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStats {
    /// Every allowed value, zero when nobody picked it.
    pub counts_by_value: BTreeMap<String, u32>,
    pub total_votes: u32,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub average: Option<f64>,
    pub suggested_story_points: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: UserId,
    pub is_observer: bool,
    pub is_host: bool,
}

/// Full authoritative state pushed to every subscriber after a transition.
///
/// Clients replace their copy wholesale; it is never a delta. Individual
/// votes only appear once the round is revealed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub board_id: BoardId,
    pub list_id: ListId,
    pub host_user_id: UserId,
    pub phase: Phase,
    pub active_card_id: Option<CardId>,
    pub active_card: Option<CardSummary>,
    pub excluded_card_ids: Vec<CardId>,
    pub participants: Vec<ParticipantView>,
    pub voted_user_ids: Vec<UserId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revealed_votes: Option<BTreeMap<UserId, String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vote_stats: Option<VoteStats>,
    pub allowed_vote_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub closing_ends_at: Option<DateTime<Utc>>,
}

/// What a caller gets back from an action: the shared snapshot (absent once
/// the session is gone) plus the caller's own vote, which is never broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub snapshot: Option<SessionSnapshot>,
    pub my_vote: Option<String>,
}

impl ActionOutcome {
    pub fn gone() -> Self {
        Self {
            snapshot: None,
            my_vote: None,
        }
    }
}
