//! Who is in a session, who only watches, and who holds the host seat.
//!
//! The registry owns the host invariant: the host is always an attached
//! participant. Detaching the host hands the seat to the earliest joiner
//! still present; detaching the last participant reports [`Detached::Emptied`]
//! so the caller can tear the session down.

use poker_core::ids::UserId;
use poker_core::{CoordinatorError, ParticipantView};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub is_observer: bool,
    /// Monotonic join sequence; lower joined earlier.
    pub join_order: u64,
}

/// Target of a host reassignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostChoice {
    To(UserId),
    /// Earliest joiner still present.
    Auto,
}

/// Result of removing a participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Detached {
    /// The user was not attached; nothing changed.
    NotPresent,
    /// Removed; carries the new host when the host seat moved.
    Removed { new_host: Option<UserId> },
    /// The last participant left.
    Emptied,
}

#[derive(Clone, Debug)]
pub struct ParticipantRegistry {
    /// Kept in join order.
    participants: Vec<Participant>,
    host: UserId,
    next_order: u64,
}

impl ParticipantRegistry {
    /// Start a registry with its first participant, who becomes host.
    pub fn new(first: UserId) -> Self {
        Self {
            participants: vec![Participant {
                user_id: first.clone(),
                is_observer: false,
                join_order: 0,
            }],
            host: first,
            next_order: 1,
        }
    }

    /// Attach a user. Idempotent: re-attaching leaves the existing entry
    /// (observer flag, join order) untouched. Returns whether it was new.
    pub fn attach(&mut self, user_id: &UserId) -> bool {
        if self.contains(user_id) {
            return false;
        }
        self.participants.push(Participant {
            user_id: user_id.clone(),
            is_observer: false,
            join_order: self.next_order,
        });
        self.next_order += 1;
        true
    }

    pub fn detach(&mut self, user_id: &UserId) -> Detached {
        let Some(idx) = self.participants.iter().position(|p| &p.user_id == user_id) else {
            return Detached::NotPresent;
        };
        let _ = self.participants.remove(idx);
        if self.participants.is_empty() {
            return Detached::Emptied;
        }
        if &self.host == user_id {
            let new_host = self.reassign_host(HostChoice::Auto).ok().cloned();
            Detached::Removed { new_host }
        } else {
            Detached::Removed { new_host: None }
        }
    }

    pub fn set_observer(&mut self, user_id: &UserId, observer: bool) -> Result<(), CoordinatorError> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| &p.user_id == user_id)
            .ok_or_else(|| CoordinatorError::NotParticipant(user_id.to_string()))?;
        participant.is_observer = observer;
        Ok(())
    }

    pub fn reassign_host(&mut self, choice: HostChoice) -> Result<&UserId, CoordinatorError> {
        let target = match choice {
            HostChoice::To(user_id) => {
                if !self.contains(&user_id) {
                    return Err(CoordinatorError::invalid(format!(
                        "cannot hand host to {user_id}: not in this session"
                    )));
                }
                user_id
            }
            HostChoice::Auto => self
                .participants
                .first()
                .map(|p| p.user_id.clone())
                .ok_or_else(|| CoordinatorError::invalid("no participant left to host"))?,
        };
        self.host = target;
        Ok(&self.host)
    }

    pub fn host(&self) -> &UserId {
        &self.host
    }

    pub fn is_host(&self, user_id: &UserId) -> bool {
        &self.host == user_id
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.get(user_id).is_some()
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user_id == user_id)
    }

    /// Attached and not observing.
    pub fn is_voter(&self, user_id: &UserId) -> bool {
        self.get(user_id).is_some_and(|p| !p.is_observer)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn views(&self) -> Vec<ParticipantView> {
        self.participants
            .iter()
            .map(|p| ParticipantView {
                user_id: p.user_id.clone(),
                is_observer: p.is_observer,
                is_host: self.is_host(&p.user_id),
            })
            .collect()
    }
}
