//! Per-user conversation state.
//!
//! Every multi-step flow is a [`Wizard`]: a current step plus a draft of the
//! inputs collected so far. Steps form a line; each has exactly one back edge
//! and going back forgets everything entered at or after the step returned to.

mod booking;
mod log;

pub use booking::{BookingDraft, BookingStep, is_offered_duration, parse_time_pick};
pub use log::{LogDraft, LogStep};

use std::fmt::Debug;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::model::{ChatId, MessageId, UserId};
use crate::observability;

pub trait WizardStep: Copy + Eq + Debug + Send + Sync + 'static {
    /// `None` on the first step.
    fn previous(self) -> Option<Self>;
    /// `None` on the last step.
    fn next(self) -> Option<Self>;
}

pub trait Draft<S: WizardStep>: Clone + Debug + Default + Send + Sync {
    /// Forgets the inputs collected at `step` and every later step.
    fn clear_from(&mut self, step: S);

    /// Steps the wizard passes over in both directions.
    fn skips(&self, _step: S) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Back<S> {
    To(S),
    /// Back from the first step leaves the wizard.
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Wizard<S: WizardStep, D: Draft<S>> {
    pub step: S,
    pub chat_id: ChatId,
    /// The message this wizard keeps editing.
    pub message_id: Option<MessageId>,
    pub data: D,
}

impl<S: WizardStep, D: Draft<S>> Wizard<S, D> {
    pub fn new(first: S, chat_id: ChatId, data: D) -> Self {
        let mut wizard = Self {
            step: first,
            chat_id,
            message_id: None,
            data,
        };
        if wizard.data.skips(first)
            && let Some(step) = wizard.following(first)
        {
            wizard.step = step;
        }
        wizard
    }

    fn following(&self, from: S) -> Option<S> {
        let mut cur = from.next()?;
        while self.data.skips(cur) {
            cur = cur.next()?;
        }
        Some(cur)
    }

    /// Moves to the next step that is not skipped. Stays put on the last step.
    pub fn forward(&mut self) -> S {
        if let Some(step) = self.following(self.step) {
            self.step = step;
        }
        self.step
    }

    pub fn back(&mut self) -> Back<S> {
        let mut cur = self.step;
        loop {
            match cur.previous() {
                None => return Back::Exit,
                Some(prev) if self.data.skips(prev) => cur = prev,
                Some(prev) => {
                    self.data.clear_from(prev);
                    self.step = prev;
                    return Back::To(prev);
                }
            }
        }
    }
}

// ── Room creation ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCreationStep {
    AwaitingRoomName,
}

impl WizardStep for RoomCreationStep {
    fn previous(self) -> Option<Self> {
        None
    }

    fn next(self) -> Option<Self> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomDraft;

impl Draft<RoomCreationStep> for RoomDraft {
    fn clear_from(&mut self, _step: RoomCreationStep) {}
}

pub type BookingWizard = Wizard<BookingStep, BookingDraft>;
pub type RoomCreationWizard = Wizard<RoomCreationStep, RoomDraft>;
pub type LogWizard = Wizard<LogStep, LogDraft>;

#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Booking(BookingWizard),
    RoomCreation(RoomCreationWizard),
    Log(LogWizard),
}

impl Session {
    pub fn kind(&self) -> &'static str {
        match self {
            Session::Booking(_) => "booking",
            Session::RoomCreation(_) => "room_creation",
            Session::Log(_) => "log",
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            Session::Booking(w) => w.chat_id,
            Session::RoomCreation(w) => w.chat_id,
            Session::Log(w) => w.chat_id,
        }
    }
}

// ── Store ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SessionLookup {
    Found(Session),
    NotFound,
    /// There was a session, but it sat idle past the limit. It is gone now.
    Expired,
}

struct Slot {
    session: Session,
    touched_at: Instant,
}

/// One wizard per user, in memory only.
pub struct SessionStore {
    slots: DashMap<UserId, Slot>,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            idle_ttl,
        }
    }

    pub fn get(&self, user_id: UserId) -> SessionLookup {
        let now = Instant::now();
        match self.slots.get(&user_id) {
            None => return SessionLookup::NotFound,
            Some(slot) if now.duration_since(slot.touched_at) <= self.idle_ttl => {
                return SessionLookup::Found(slot.session.clone());
            }
            Some(_) => {}
        }
        if self
            .slots
            .remove_if(&user_id, |_, slot| now.duration_since(slot.touched_at) > self.idle_ttl)
            .is_some()
        {
            self.record_len();
        }
        SessionLookup::Expired
    }

    /// Starts a new wizard, replacing whatever the user had open.
    pub fn begin(&self, user_id: UserId, session: Session) -> Option<Session> {
        let previous = self.put(user_id, session);
        if let Some(old) = &previous {
            tracing::debug!("user {user_id}: {} wizard replaced", old.kind());
        }
        previous
    }

    /// Saves `session` and resets its idle clock.
    pub fn put(&self, user_id: UserId, session: Session) -> Option<Session> {
        let previous = self
            .slots
            .insert(
                user_id,
                Slot {
                    session,
                    touched_at: Instant::now(),
                },
            )
            .map(|slot| slot.session);
        self.record_len();
        previous
    }

    pub fn remove(&self, user_id: UserId) -> Option<Session> {
        let removed = self.slots.remove(&user_id).map(|(_, slot)| slot.session);
        self.record_len();
        removed
    }

    /// Drops every session idle past the limit.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| now.duration_since(slot.touched_at) <= self.idle_ttl);
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            metrics::counter!(observability::SESSIONS_EVICTED_TOTAL).increment(evicted as u64);
            self.record_len();
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn record_len(&self) {
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.slots.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoomId;

    fn booking_session(chat: i64) -> Session {
        Session::Booking(Wizard::new(
            BookingStep::ChoosingRoom,
            ChatId(chat),
            BookingDraft::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_distinguishes_missing_and_expired() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert_eq!(store.get(UserId(1)), SessionLookup::NotFound);

        store.begin(UserId(1), booking_session(10));
        assert!(matches!(store.get(UserId(1)), SessionLookup::Found(_)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get(UserId(1)), SessionLookup::Expired);
        assert_eq!(store.get(UserId(1)), SessionLookup::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn put_resets_idle_clock() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.begin(UserId(1), booking_session(10));
        tokio::time::advance(Duration::from_secs(45)).await;
        store.put(UserId(1), booking_session(10));
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(matches!(store.get(UserId(1)), SessionLookup::Found(_)));
    }

    #[tokio::test]
    async fn begin_replaces_existing_wizard() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.begin(UserId(1), booking_session(10));
        let replaced = store.begin(
            UserId(1),
            Session::RoomCreation(Wizard::new(
                RoomCreationStep::AwaitingRoomName,
                ChatId(10),
                RoomDraft,
            )),
        );
        assert_eq!(replaced.map(|s| s.kind()), Some("booking"));
        assert_eq!(store.len(), 1);
        match store.get(UserId(1)) {
            SessionLookup::Found(Session::RoomCreation(_)) => {}
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_keeps_fresh_sessions() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.begin(UserId(1), booking_session(10));
        tokio::time::advance(Duration::from_secs(50)).await;
        store.begin(UserId(2), booking_session(20));
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(store.evict_idle(), 1);
        assert_eq!(store.get(UserId(1)), SessionLookup::NotFound);
        assert!(matches!(store.get(UserId(2)), SessionLookup::Found(_)));
    }

    #[test]
    fn back_from_first_step_exits() {
        let mut w: BookingWizard =
            Wizard::new(BookingStep::ChoosingRoom, ChatId(1), BookingDraft::default());
        assert_eq!(w.back(), Back::Exit);
        assert_eq!(w.step, BookingStep::ChoosingRoom);
    }

    #[test]
    fn forward_stops_on_last_step() {
        let mut w: BookingWizard =
            Wizard::new(BookingStep::ConfirmingBooking, ChatId(1), BookingDraft::default());
        assert_eq!(w.forward(), BookingStep::ConfirmingBooking);
    }

    #[test]
    fn remove_returns_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.remove(UserId(1)).is_none());
        let mut draft = BookingDraft::default();
        draft.room_id = Some(RoomId(3));
        store.put(
            UserId(1),
            Session::Booking(Wizard::new(BookingStep::ChoosingDate, ChatId(1), draft)),
        );
        assert!(matches!(store.remove(UserId(1)), Some(Session::Booking(_))));
        assert!(store.is_empty());
    }
}
