//! Session manager: the public entry point, one call per client action.
//!
//! Each (project, board) key owns a slot behind its own async mutex, so
//! actions on one session are applied strictly one at a time while
//! different sessions proceed in parallel. There is no global lock; the
//! `DashMap` is only touched to look up or retire a slot.
//!
//! A destroyed session's slot is marked retired and removed from the map
//! while still locked. Callers that were already queued on it observe the
//! flag and re-resolve the key.
//!
//! Card candidates are read before the slot is locked. The single I/O call
//! made under the lock is the story-point write-back on assignment, which
//! runs before the in-memory transition.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use poker_core::ids::{CardId, ListId, SessionId, SessionKey, UserId};
use poker_core::{
    ActionOutcome, Card, CardSource, CoordinatorError, Phase, SessionUpdate, SnapshotPublisher,
    VoteDeck,
};

use crate::machine::{Departure, Session};

/// Actions applied (counter, labels: action).
pub const ACTIONS_TOTAL: &str = "poker_actions_total";
/// Actions rejected (counter, labels: action, kind).
pub const ACTION_ERRORS_TOTAL: &str = "poker_action_errors_total";
/// Live sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "poker_sessions_active";

/// Default time between `closeSession` and the session being destroyed.
pub const DEFAULT_CLOSING_DELAY: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub closing_delay: Duration,
    /// Deck handed to every new session.
    pub deck: VoteDeck,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            closing_delay: DEFAULT_CLOSING_DELAY,
            deck: VoteDeck::default(),
        }
    }
}

#[derive(Default)]
struct Slot {
    session: Option<Session>,
    retired: bool,
    closing_timer: Option<CancellationToken>,
}

type SlotRef = Arc<Mutex<Slot>>;

/// A locked slot plus the handle needed to retire it from the map.
struct Locked {
    slot: SlotRef,
    guard: OwnedMutexGuard<Slot>,
}

impl Locked {
    fn session(&self) -> Result<&Session, CoordinatorError> {
        self.guard.session.as_ref().ok_or(CoordinatorError::SessionNotFound)
    }

    fn session_mut(&mut self) -> Result<&mut Session, CoordinatorError> {
        self.guard.session.as_mut().ok_or(CoordinatorError::SessionNotFound)
    }
}

struct Inner {
    slots: DashMap<SessionKey, SlotRef>,
    cards: Arc<dyn CardSource>,
    publisher: Arc<dyn SnapshotPublisher>,
    config: ManagerConfig,
    active: AtomicUsize,
}

/// Coordinator for every planning poker session in the process.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        cards: Arc<dyn CardSource>,
        publisher: Arc<dyn SnapshotPublisher>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                cards,
                publisher,
                config,
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    // ── Actions ──

    /// Attach `actor` to the key's session, creating it for `list_id` when
    /// absent. The creator becomes host. `list_id` is ignored once a session
    /// exists.
    pub async fn join(
        &self,
        key: &SessionKey,
        actor: &UserId,
        list_id: &ListId,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let result = self.join_inner(key, actor, list_id).await;
        self.finish("join", key, actor, result)
    }

    pub async fn leave(&self, key: &SessionKey, actor: &UserId) -> Result<ActionOutcome, CoordinatorError> {
        let result = self.leave_inner(key, actor).await;
        self.finish("leave", key, actor, result)
    }

    /// Transport-level disconnect. Same as [`leave`](Self::leave) but quiet
    /// when the user or the session is already gone, so a duplicate or late
    /// disconnect is harmless. Returns whether a participant was removed.
    pub async fn disconnect(&self, key: &SessionKey, actor: &UserId) -> bool {
        self.disconnect_if(key, actor, || true).await
    }

    /// [`disconnect`](Self::disconnect) when `release` agrees. `release` runs
    /// with the session locked, so a re-join that raced ahead of this call
    /// through another connection is seen and keeps the seat.
    pub async fn disconnect_if<F>(&self, key: &SessionKey, actor: &UserId, release: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let result = match self.lock_existing(key).await {
            Ok(mut locked) => {
                if !release() {
                    debug!(%key, user_id = %actor, "seat still held by another connection");
                    return false;
                }
                self.leave_locked(key, &mut locked, actor)
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {
                counter!(ACTIONS_TOTAL, "action" => "disconnect").increment(1);
                true
            }
            Err(CoordinatorError::SessionNotFound | CoordinatorError::NotParticipant(_)) => false,
            Err(e) => {
                warn!(%key, user_id = %actor, error = %e, "disconnect could not detach participant");
                false
            }
        }
    }

    pub async fn set_observer(
        &self,
        key: &SessionKey,
        actor: &UserId,
        observer: bool,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let result = self
            .transition(key, actor, |s| s.set_observer(actor, observer))
            .await;
        self.finish("set_observer", key, actor, result)
    }

    pub async fn activate_story(
        &self,
        key: &SessionKey,
        actor: &UserId,
        card_id: &CardId,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let result = async {
            let (list_id, cards) = self
                .candidates_for(key, |s| {
                    s.require_host(actor)?;
                    s.require_open("activate a story")
                })
                .await?;
            self.transition(key, actor, |s| {
                ensure_list(s, &list_id)?;
                s.activate_story(actor, card_id, &cards)
            })
            .await
        }
        .await;
        self.finish("activate_story", key, actor, result)
    }

    pub async fn vote(
        &self,
        key: &SessionKey,
        actor: &UserId,
        value: &str,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let result = self.transition(key, actor, |s| s.vote(actor, value)).await;
        self.finish("vote", key, actor, result)
    }

    pub async fn finish_vote(&self, key: &SessionKey, actor: &UserId) -> Result<ActionOutcome, CoordinatorError> {
        let result = self.transition(key, actor, |s| s.finish_vote(actor)).await;
        self.finish("finish_vote", key, actor, result)
    }

    pub async fn restart_vote(&self, key: &SessionKey, actor: &UserId) -> Result<ActionOutcome, CoordinatorError> {
        let result = self.transition(key, actor, |s| s.restart_vote(actor)).await;
        self.finish("restart_vote", key, actor, result)
    }

    /// Write `points` to the active card, then move on to the next eligible
    /// card. A failed write leaves the session exactly as it was.
    pub async fn assign_story_points(
        &self,
        key: &SessionKey,
        actor: &UserId,
        points: f64,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let result = self.assign_inner(key, actor, points).await;
        self.finish("assign_story_points", key, actor, result)
    }

    pub async fn skip_story(&self, key: &SessionKey, actor: &UserId) -> Result<ActionOutcome, CoordinatorError> {
        let result = async {
            let (list_id, cards) = self
                .candidates_for(key, |s| {
                    s.require_host(actor)?;
                    s.require_open("skip a story")
                })
                .await?;
            self.transition(key, actor, |s| {
                ensure_list(s, &list_id)?;
                s.skip_story(actor, &cards)
            })
            .await
        }
        .await;
        self.finish("skip_story", key, actor, result)
    }

    pub async fn transfer_host(
        &self,
        key: &SessionKey,
        actor: &UserId,
        target: &UserId,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let result = self
            .transition(key, actor, |s| s.transfer_host(actor, target))
            .await;
        self.finish("transfer_host", key, actor, result)
    }

    /// Enter the closing phase and start the countdown after which the
    /// session is destroyed.
    pub async fn close_session(&self, key: &SessionKey, actor: &UserId) -> Result<ActionOutcome, CoordinatorError> {
        let delay = chrono::Duration::from_std(self.inner.config.closing_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let ends_at = Utc::now() + delay;
        let result = self.transition(key, actor, |s| s.close(actor, ends_at)).await;
        self.finish("close_session", key, actor, result)
    }

    /// Current state as seen by `viewer`, or `None` when no session exists.
    pub async fn snapshot(&self, key: &SessionKey, viewer: Option<&UserId>) -> Option<ActionOutcome> {
        let locked = self.lock_existing(key).await.ok()?;
        let session = locked.session().ok()?;
        Some(ActionOutcome {
            snapshot: Some(session.snapshot()),
            my_vote: viewer
                .and_then(|v| session.vote_of(v))
                .map(str::to_string),
        })
    }

    // ── Internals ──

    async fn join_inner(
        &self,
        key: &SessionKey,
        actor: &UserId,
        list_id: &ListId,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let mut candidates: Option<Vec<Card>> = None;
        loop {
            let slot = self.slot_or_insert(key);
            let mut guard = Arc::clone(&slot).lock_owned().await;
            if guard.retired {
                continue;
            }

            if let Some(session) = guard.session.as_mut() {
                if session.join(actor) {
                    info!(session_id = %session.id(), %key, user_id = %actor, "participant joined");
                }
                let mut locked = Locked { slot, guard };
                return Ok(self.commit(&mut locked, actor));
            }

            if let Some(cards) = candidates.take() {
                let session = Session::create(
                    key.clone(),
                    list_id.clone(),
                    actor.clone(),
                    self.inner.config.deck.clone(),
                    &cards,
                );
                info!(
                    session_id = %session.id(),
                    %key,
                    list_id = %list_id,
                    host = %actor,
                    candidates = cards.len(),
                    "planning poker session created"
                );
                guard.session = Some(session);
                let _ = self.inner.active.fetch_add(1, Ordering::Relaxed);
                gauge!(SESSIONS_ACTIVE).increment(1.0);
                let mut locked = Locked { slot, guard };
                return Ok(self.commit(&mut locked, actor));
            }

            // No session yet: load the list without holding the slot, then retry.
            drop(guard);
            match self.inner.cards.list_candidates(list_id).await {
                Ok(cards) => candidates = Some(cards),
                Err(e) => {
                    self.discard_if_empty(key, &slot).await;
                    return Err(e.into());
                }
            }
        }
    }

    async fn leave_inner(&self, key: &SessionKey, actor: &UserId) -> Result<ActionOutcome, CoordinatorError> {
        let mut locked = self.lock_existing(key).await?;
        self.leave_locked(key, &mut locked, actor)
    }

    fn leave_locked(
        &self,
        key: &SessionKey,
        locked: &mut Locked,
        actor: &UserId,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let departure = apply(locked.session_mut()?, |s| s.leave(actor))?;
        match departure {
            Departure::Destroyed => {
                self.destroy(key, locked, "last participant left");
                Ok(ActionOutcome::gone())
            }
            Departure::Left { new_host } => {
                if let Some(host) = new_host {
                    info!(%key, left = %actor, new_host = %host, "host seat passed on");
                }
                Ok(self.commit(locked, actor))
            }
        }
    }

    async fn assign_inner(
        &self,
        key: &SessionKey,
        actor: &UserId,
        points: f64,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let (list_id, cards) = self
            .candidates_for(key, |s| s.prepare_assignment(actor, points).map(|_| ()))
            .await?;

        let mut locked = self.lock_existing(key).await?;
        let session = locked.session_mut()?;
        ensure_list(session, &list_id)?;
        let card_id = session.prepare_assignment(actor, points)?;

        if let Err(e) = self.inner.cards.set_story_points(&card_id, points).await {
            warn!(%key, card_id = %card_id, points, error = %e, "story point write-back failed");
            return Err(e.into());
        }
        info!(session_id = %session.id(), card_id = %card_id, points, "story points assigned");

        apply(session, |s| {
            s.complete_assignment(&card_id, &cards);
            Ok(())
        })?;
        Ok(self.commit(&mut locked, actor))
    }

    /// Apply a synchronous transition to the key's session and publish the result.
    async fn transition<F>(
        &self,
        key: &SessionKey,
        actor: &UserId,
        f: F,
    ) -> Result<ActionOutcome, CoordinatorError>
    where
        F: FnOnce(&mut Session) -> Result<(), CoordinatorError>,
    {
        let mut locked = self.lock_existing(key).await?;
        apply(locked.session_mut()?, f)?;
        Ok(self.commit(&mut locked, actor))
    }

    /// Validate with `check` under a short lock, then read the session's
    /// list outside of it.
    async fn candidates_for<F>(
        &self,
        key: &SessionKey,
        check: F,
    ) -> Result<(ListId, Vec<Card>), CoordinatorError>
    where
        F: FnOnce(&Session) -> Result<(), CoordinatorError>,
    {
        let list_id = {
            let locked = self.lock_existing(key).await?;
            let session = locked.session()?;
            check(session)?;
            session.list_id().clone()
        };
        let cards = self.inner.cards.list_candidates(&list_id).await?;
        Ok((list_id, cards))
    }

    /// Publish the committed state and return the caller's view of it.
    fn commit(&self, locked: &mut Locked, actor: &UserId) -> ActionOutcome {
        let Some(session) = locked.guard.session.as_ref() else {
            return ActionOutcome::gone();
        };
        let snapshot = session.snapshot();
        let my_vote = session.vote_of(actor).map(str::to_string);
        let key = session.key().clone();
        let session_id = session.id().clone();
        let needs_timer = session.phase() == Phase::Closing && locked.guard.closing_timer.is_none();

        self.inner.publisher.publish(
            &key.project_id,
            &SessionUpdate {
                board_id: key.board_id.clone(),
                snapshot: Some(snapshot.clone()),
            },
        );

        if needs_timer {
            locked.guard.closing_timer = Some(self.arm_closing_timer(key, session_id));
        }

        ActionOutcome {
            snapshot: Some(snapshot),
            my_vote,
        }
    }

    /// Tear down the locked session, retire its slot and announce the absence.
    fn destroy(&self, key: &SessionKey, locked: &mut Locked, reason: &'static str) {
        if let Some(timer) = locked.guard.closing_timer.take() {
            timer.cancel();
        }
        let Some(session) = locked.guard.session.take() else {
            return;
        };
        locked.guard.retired = true;
        let slot = &locked.slot;
        let _ = self.inner.slots.remove_if(key, |_, v| Arc::ptr_eq(v, slot));
        let _ = self.inner.active.fetch_sub(1, Ordering::Relaxed);
        gauge!(SESSIONS_ACTIVE).decrement(1.0);

        info!(session_id = %session.id(), %key, reason, "planning poker session destroyed");
        self.inner.publisher.publish(
            &key.project_id,
            &SessionUpdate {
                board_id: key.board_id.clone(),
                snapshot: None,
            },
        );
    }

    fn arm_closing_timer(&self, key: SessionKey, session_id: SessionId) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let inner = Arc::downgrade(&self.inner);
        let delay = self.inner.config.closing_delay;
        debug!(%key, session_id = %session_id, delay_ms = delay.as_millis() as u64, "closing countdown armed");

        let _ = tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        SessionManager { inner }.expire(&key, &session_id).await;
                    }
                }
            }
        });
        token
    }

    /// Countdown fired. No-op unless the same session is still closing.
    async fn expire(&self, key: &SessionKey, session_id: &SessionId) {
        let Ok(mut locked) = self.lock_existing(key).await else {
            return;
        };
        let armed = locked
            .guard
            .session
            .as_ref()
            .is_some_and(|s| s.id() == session_id && s.phase() == Phase::Closing);
        if !armed {
            return;
        }
        locked.guard.closing_timer = None;
        counter!(ACTIONS_TOTAL, "action" => "closing_expired").increment(1);
        self.destroy(key, &mut locked, "closing countdown expired");
    }

    async fn lock_existing(&self, key: &SessionKey) -> Result<Locked, CoordinatorError> {
        loop {
            let slot = self
                .inner
                .slots
                .get(key)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or(CoordinatorError::SessionNotFound)?;
            let guard = Arc::clone(&slot).lock_owned().await;
            if guard.retired {
                continue;
            }
            if guard.session.is_none() {
                return Err(CoordinatorError::SessionNotFound);
            }
            return Ok(Locked { slot, guard });
        }
    }

    fn slot_or_insert(&self, key: &SessionKey) -> SlotRef {
        Arc::clone(self.inner.slots.entry(key.clone()).or_default().value())
    }

    /// Drop a slot that a failed join created but never filled.
    async fn discard_if_empty(&self, key: &SessionKey, slot: &SlotRef) {
        let mut guard = slot.lock().await;
        if guard.session.is_none() && !guard.retired {
            guard.retired = true;
            let _ = self.inner.slots.remove_if(key, |_, v| Arc::ptr_eq(v, slot));
        }
    }

    fn finish(
        &self,
        action: &'static str,
        key: &SessionKey,
        actor: &UserId,
        result: Result<ActionOutcome, CoordinatorError>,
    ) -> Result<ActionOutcome, CoordinatorError> {
        counter!(ACTIONS_TOTAL, "action" => action).increment(1);
        match &result {
            Ok(outcome) => debug!(
                %key,
                user_id = %actor,
                action,
                phase = ?outcome.snapshot.as_ref().map(|s| s.phase),
                "planning poker action applied"
            ),
            Err(e) => {
                counter!(ACTION_ERRORS_TOTAL, "action" => action, "kind" => e.error_kind()).increment(1);
                debug!(%key, user_id = %actor, action, error = %e, "planning poker action rejected");
            }
        }
        result
    }
}

/// Run `f` against a draft copy and commit only when it succeeds. A panic
/// inside the transition is contained here so the slot stays usable.
fn apply<T>(
    session: &mut Session,
    f: impl FnOnce(&mut Session) -> Result<T, CoordinatorError>,
) -> Result<T, CoordinatorError> {
    let mut draft = session.clone();
    let out = panic::catch_unwind(AssertUnwindSafe(|| f(&mut draft)))
        .map_err(|_| CoordinatorError::invalid("transition aborted unexpectedly"))??;
    *session = draft;
    Ok(out)
}

fn ensure_list(session: &Session, list_id: &ListId) -> Result<(), CoordinatorError> {
    if session.list_id() == list_id {
        Ok(())
    } else {
        Err(CoordinatorError::invalid(
            "session changed while cards were loading; retry",
        ))
    }
}
