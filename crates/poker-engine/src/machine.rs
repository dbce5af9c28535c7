//! Session state machine.
//!
//! A [`Session`] is the aggregate for one (project, board) estimation round.
//! Every method here is a synchronous transition that validates first and
//! mutates second; the manager applies them to a draft copy and commits only
//! on success, so a rejected action never leaves partial state behind.
//!
//! Phases: `voting` → `revealed` (host reveals) → `voting` (restart, next
//! story) and any open phase → `closing` (host closes). The absence of a
//! session is the initial and terminal state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use poker_core::ids::{CardId, ListId, SessionId, SessionKey, UserId};
use poker_core::{
    Card, CardSummary, CoordinatorError, Phase, SessionSnapshot, VoteDeck,
};

use crate::registry::{Detached, HostChoice, ParticipantRegistry};
use crate::tally::tally;

/// Outcome of a participant leaving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Departure {
    Left { new_host: Option<UserId> },
    /// Nobody is left; the session must be destroyed.
    Destroyed,
}

#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    key: SessionKey,
    list_id: ListId,
    deck: VoteDeck,
    registry: ParticipantRegistry,
    phase: Phase,
    active_card: Option<CardSummary>,
    excluded: Vec<CardId>,
    /// Cards assigned points in this session. Candidate lists are read
    /// before the slot lock, so they can predate an assignment.
    estimated: Vec<CardId>,
    votes: BTreeMap<UserId, String>,
    /// Votes frozen at reveal; later departures don't rewrite them.
    revealed_votes: Option<BTreeMap<UserId, String>>,
    closing_ends_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Open a session with `host` as its first participant. The first
    /// eligible card of the list becomes the active story.
    pub fn create(
        key: SessionKey,
        list_id: ListId,
        host: UserId,
        deck: VoteDeck,
        candidates: &[Card],
    ) -> Self {
        let mut session = Self {
            id: SessionId::new(),
            key,
            list_id,
            deck,
            registry: ParticipantRegistry::new(host),
            phase: Phase::Voting,
            active_card: None,
            excluded: Vec::new(),
            estimated: Vec::new(),
            votes: BTreeMap::new(),
            revealed_votes: None,
            closing_ends_at: None,
            created_at: Utc::now(),
        };
        session.select_next(candidates);
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn host(&self) -> &UserId {
        self.registry.host()
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn active_card_id(&self) -> Option<&CardId> {
        self.active_card.as_ref().map(|c| &c.card_id)
    }

    pub fn excluded(&self) -> &[CardId] {
        &self.excluded
    }

    pub fn estimated(&self) -> &[CardId] {
        &self.estimated
    }

    pub fn closing_ends_at(&self) -> Option<DateTime<Utc>> {
        self.closing_ends_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn vote_of(&self, user_id: &UserId) -> Option<&str> {
        self.votes.get(user_id).map(String::as_str)
    }

    // ── Guards ──

    pub fn require_member(&self, actor: &UserId) -> Result<(), CoordinatorError> {
        if self.registry.contains(actor) {
            Ok(())
        } else {
            Err(CoordinatorError::NotParticipant(actor.to_string()))
        }
    }

    pub fn require_host(&self, actor: &UserId) -> Result<(), CoordinatorError> {
        self.require_member(actor)?;
        if self.registry.is_host(actor) {
            Ok(())
        } else {
            Err(CoordinatorError::NotHost)
        }
    }

    pub fn require_open(&self, action: &str) -> Result<(), CoordinatorError> {
        if self.phase == Phase::Closing {
            Err(CoordinatorError::invalid(format!(
                "cannot {action}: session is closing"
            )))
        } else {
            Ok(())
        }
    }

    // ── Transitions ──

    /// Attach a participant. Idempotent; never changes the phase.
    pub fn join(&mut self, user_id: &UserId) -> bool {
        self.registry.attach(user_id)
    }

    pub fn vote(&mut self, actor: &UserId, value: &str) -> Result<(), CoordinatorError> {
        self.require_member(actor)?;
        self.require_open("vote")?;
        if !self.registry.is_voter(actor) {
            return Err(CoordinatorError::invalid("observers cannot vote"));
        }
        if self.phase != Phase::Voting {
            return Err(CoordinatorError::invalid(
                "votes are revealed; restart the round to vote again",
            ));
        }
        if self.active_card.is_none() {
            return Err(CoordinatorError::invalid("no active story to vote on"));
        }
        let Some(value) = self.deck.canonical(value).map(str::to_string) else {
            return Err(CoordinatorError::invalid(format!(
                "{value} is not an allowed vote value"
            )));
        };
        let _ = self.votes.insert(actor.clone(), value);
        Ok(())
    }

    pub fn finish_vote(&mut self, actor: &UserId) -> Result<(), CoordinatorError> {
        self.require_host(actor)?;
        self.require_open("reveal votes")?;
        if self.phase != Phase::Voting {
            return Err(CoordinatorError::invalid("votes are already revealed"));
        }
        self.revealed_votes = Some(self.counted_votes());
        self.phase = Phase::Revealed;
        Ok(())
    }

    pub fn restart_vote(&mut self, actor: &UserId) -> Result<(), CoordinatorError> {
        self.require_host(actor)?;
        self.require_open("restart the vote")?;
        if self.phase != Phase::Revealed {
            return Err(CoordinatorError::invalid("votes have not been revealed yet"));
        }
        self.new_round();
        Ok(())
    }

    pub fn activate_story(
        &mut self,
        actor: &UserId,
        card_id: &CardId,
        candidates: &[Card],
    ) -> Result<(), CoordinatorError> {
        self.require_host(actor)?;
        self.require_open("activate a story")?;
        let card = candidates
            .iter()
            .find(|c| &c.card_id == card_id)
            .ok_or_else(|| {
                CoordinatorError::invalid(format!("card {card_id} is not in list {}", self.list_id))
            })?;
        if card.is_estimated() || self.estimated.contains(card_id) {
            return Err(CoordinatorError::invalid(format!(
                "card {card_id} is already estimated"
            )));
        }
        if self.excluded.contains(card_id) {
            return Err(CoordinatorError::invalid(format!(
                "card {card_id} was skipped in this session"
            )));
        }
        self.active_card = Some(card.summary());
        self.new_round();
        Ok(())
    }

    pub fn skip_story(&mut self, actor: &UserId, candidates: &[Card]) -> Result<(), CoordinatorError> {
        self.require_host(actor)?;
        self.require_open("skip a story")?;
        if let Some(active) = self.active_card.take() {
            if !self.excluded.contains(&active.card_id) {
                self.excluded.push(active.card_id);
            }
        }
        self.select_next(candidates);
        self.new_round();
        Ok(())
    }

    /// Check an assignment before the card source is written. Returns the
    /// card that will receive the points.
    pub fn prepare_assignment(&self, actor: &UserId, points: f64) -> Result<CardId, CoordinatorError> {
        self.require_host(actor)?;
        self.require_open("assign story points")?;
        if self.phase != Phase::Revealed {
            return Err(CoordinatorError::invalid(
                "story points can only be assigned after votes are revealed",
            ));
        }
        if !points.is_finite() || points <= 0.0 {
            return Err(CoordinatorError::invalid(format!(
                "story points must be a positive number, got {points}"
            )));
        }
        self.active_card_id()
            .cloned()
            .ok_or_else(|| CoordinatorError::invalid("no active story to assign points to"))
    }

    /// Advance after the card source accepted the points for `assigned`.
    /// With no eligible card left the round stays in `voting` with no story.
    pub fn complete_assignment(&mut self, assigned: &CardId, candidates: &[Card]) {
        if !self.estimated.contains(assigned) {
            self.estimated.push(assigned.clone());
        }
        self.select_next(candidates);
        self.new_round();
    }

    pub fn set_observer(&mut self, actor: &UserId, observer: bool) -> Result<(), CoordinatorError> {
        self.registry.set_observer(actor, observer)?;
        if observer {
            let _ = self.votes.remove(actor);
        }
        Ok(())
    }

    pub fn transfer_host(&mut self, actor: &UserId, target: &UserId) -> Result<(), CoordinatorError> {
        self.require_host(actor)?;
        let _ = self.registry.reassign_host(HostChoice::To(target.clone()))?;
        Ok(())
    }

    pub fn close(&mut self, actor: &UserId, ends_at: DateTime<Utc>) -> Result<(), CoordinatorError> {
        self.require_host(actor)?;
        self.require_open("close the session")?;
        self.phase = Phase::Closing;
        self.revealed_votes = None;
        self.closing_ends_at = Some(ends_at);
        Ok(())
    }

    pub fn leave(&mut self, actor: &UserId) -> Result<Departure, CoordinatorError> {
        match self.registry.detach(actor) {
            Detached::NotPresent => Err(CoordinatorError::NotParticipant(actor.to_string())),
            Detached::Emptied => Ok(Departure::Destroyed),
            Detached::Removed { new_host } => {
                let _ = self.votes.remove(actor);
                Ok(Departure::Left { new_host })
            }
        }
    }

    // ── Views ──

    /// Votes that count: cast by participants who are still attached voters.
    fn counted_votes(&self) -> BTreeMap<UserId, String> {
        self.votes
            .iter()
            .filter(|(user, _)| self.registry.is_voter(user))
            .map(|(user, value)| (user.clone(), value.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let revealed = self.phase == Phase::Revealed;
        let counted = match &self.revealed_votes {
            Some(frozen) if revealed => frozen.clone(),
            _ => self.counted_votes(),
        };
        let voted_user_ids = self
            .registry
            .iter()
            .filter(|p| counted.contains_key(&p.user_id))
            .map(|p| p.user_id.clone())
            .collect();
        let vote_stats = revealed.then(|| tally(&counted, &self.deck));

        SessionSnapshot {
            session_id: self.id.clone(),
            project_id: self.key.project_id.clone(),
            board_id: self.key.board_id.clone(),
            list_id: self.list_id.clone(),
            host_user_id: self.registry.host().clone(),
            phase: self.phase,
            active_card_id: self.active_card_id().cloned(),
            active_card: self.active_card.clone(),
            excluded_card_ids: self.excluded.clone(),
            participants: self.registry.views(),
            voted_user_ids,
            revealed_votes: revealed.then_some(counted),
            vote_stats,
            allowed_vote_values: self.deck.values().to_vec(),
            closing_ends_at: if self.phase == Phase::Closing {
                self.closing_ends_at
            } else {
                None
            },
        }
    }

    /// Clear the round's votes and go back to `voting`.
    fn new_round(&mut self) {
        self.votes.clear();
        self.revealed_votes = None;
        self.phase = Phase::Voting;
    }

    /// First candidate that is neither estimated nor skipped.
    fn select_next(&mut self, candidates: &[Card]) {
        self.active_card = candidates
            .iter()
            .find(|c| {
                !c.is_estimated()
                    && !self.estimated.contains(&c.card_id)
                    && !self.excluded.contains(&c.card_id)
            })
            .map(Card::summary);
    }
}
