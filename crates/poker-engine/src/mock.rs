//! In-memory collaborators for tests and local demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use poker_core::ids::{CardId, ListId, ProjectId};
use poker_core::{Card, CardSource, CardSourceError, SessionUpdate, SnapshotPublisher};
use tokio::sync::Notify;

/// Stalls one card-source call until [`release`](Gate::release)d.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    /// Resolves once the gated call is parked.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }
}

/// Card source backed by a map of lists. Records every story-point write.
#[derive(Default)]
pub struct MemoryCardSource {
    lists: Mutex<HashMap<ListId, Vec<Card>>>,
    writes: Mutex<Vec<(CardId, f64)>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    read_gate: Mutex<Option<Arc<Gate>>>,
    write_gate: Mutex<Option<Arc<Gate>>>,
}

impl MemoryCardSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a list with unestimated cards named after their ids.
    pub fn with_list(self, list_id: &str, card_ids: &[&str]) -> Self {
        let cards = card_ids
            .iter()
            .map(|id| Card {
                card_id: CardId::from_raw(*id),
                name: format!("Card {id}"),
                description: None,
                story_points: None,
            })
            .collect();
        self.put_list(list_id, cards);
        self
    }

    pub fn put_list(&self, list_id: &str, cards: Vec<Card>) {
        let _ = self.lists.lock().insert(ListId::from_raw(list_id), cards);
    }

    pub fn writes(&self) -> Vec<(CardId, f64)> {
        self.writes.lock().clone()
    }

    pub fn story_points(&self, card_id: &str) -> Option<f64> {
        self.lists
            .lock()
            .values()
            .flatten()
            .find(|c| c.card_id.as_str() == card_id)
            .and_then(|c| c.story_points)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Park the next `list_candidates` after it has read the list.
    pub fn hold_next_read(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.read_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Park the next `set_story_points` before it writes.
    pub fn hold_next_write(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.write_gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl CardSource for MemoryCardSource {
    async fn list_candidates(&self, list_id: &ListId) -> Result<Vec<Card>, CardSourceError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(CardSourceError::Unavailable("reads disabled".into()));
        }
        let cards = self
            .lists
            .lock()
            .get(list_id)
            .cloned()
            .ok_or_else(|| CardSourceError::ListNotFound(list_id.to_string()))?;
        let gate = self.read_gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(cards)
    }

    async fn set_story_points(&self, card_id: &CardId, points: f64) -> Result<(), CardSourceError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(CardSourceError::Unavailable("writes disabled".into()));
        }
        let gate = self.write_gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut lists = self.lists.lock();
        let card = lists
            .values_mut()
            .flatten()
            .find(|c| &c.card_id == card_id)
            .ok_or_else(|| CardSourceError::CardNotFound(card_id.to_string()))?;
        card.story_points = Some(points);
        self.writes.lock().push((card_id.clone(), points));
        Ok(())
    }
}

/// Publisher that keeps every update it was handed.
#[derive(Default)]
pub struct RecordingPublisher {
    updates: Mutex<Vec<(ProjectId, SessionUpdate)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(ProjectId, SessionUpdate)> {
        self.updates.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn last(&self) -> Option<SessionUpdate> {
        self.updates.lock().last().map(|(_, u)| u.clone())
    }
}

impl SnapshotPublisher for RecordingPublisher {
    fn publish(&self, project_id: &ProjectId, update: &SessionUpdate) {
        self.updates.lock().push((project_id.clone(), update.clone()));
    }
}
