mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::StoreError;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicI64;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::journal::Journal;
use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Storage ports ────────────────────────────────────────

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Inserts atomically. Fails with [`StoreError::Exclusion`] when the room
    /// already holds an intersecting booking.
    async fn create(&self, booking: NewBooking) -> Result<Booking, StoreError>;
    async fn delete(&self, id: BookingId) -> Result<Booking, StoreError>;
    async fn get_by_id(&self, id: BookingId) -> Result<Booking, StoreError>;
    /// Bookings intersecting `range`, ordered by `(start, id)`.
    async fn list_by_room_and_interval(
        &self,
        room_id: RoomId,
        range: &TimeRange,
    ) -> Result<Vec<Booking>, StoreError>;
    /// Bookings of `user_id` ending after `from`, ordered by `(start, id)`.
    async fn list_by_user(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;
    async fn any_overlap(&self, room_id: RoomId, range: &TimeRange) -> Result<bool, StoreError>;
    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn create_room(&self, name: &str) -> Result<Room, StoreError>;
    async fn deactivate_room(&self, id: RoomId) -> Result<Room, StoreError>;
    async fn activate_room(&self, id: RoomId) -> Result<Room, StoreError>;
    /// Active rooms ordered by id.
    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError>;
    async fn list_all_rooms(&self) -> Result<Vec<Room>, StoreError>;
    async fn get_room(&self, id: RoomId) -> Result<Room, StoreError>;
}

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn create_entry(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError>;
    async fn list_entries_by_user(&self, user_id: UserId) -> Result<Vec<LogEntry>, StoreError>;
    async fn get_entry(&self, kind: LogKind, number: u64) -> Result<Option<LogEntry>, StoreError>;
    async fn list_entries_since(&self, from: DateTime<Utc>) -> Result<Vec<LogEntry>, StoreError>;
    async fn get_profile(&self, user_id: UserId) -> Result<Option<String>, StoreError>;
    async fn save_profile(&self, user_id: UserId, full_name: &str) -> Result<(), StoreError>;
}

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Snapshot {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    SinceSnapshot {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Takes the first queued append, drains whatever else is
/// already queued, commits the batch with one fsync and answers every sender.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut journal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut journal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut journal, cmd);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = journal.stage(event) {
            result = Err(e);
            break;
        }
    }
    // Commit even after a staging error so half-written bytes do not leak
    // into the next batch.
    let committed = journal.commit();
    let result = result.and(committed);

    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("journal commit failed: {e}");
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Snapshot { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.install_snapshot());
            let _ = response.send(result);
        }
        JournalCommand::SinceSnapshot { response } => {
            let _ = response.send(journal.since_snapshot());
        }
        JournalCommand::Append { event, response } => commit_batch(journal, vec![(event, response)]),
    }
}

// ── Log book ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct LogBook {
    pub entries: Vec<LogEntry>,
    pub last_number: HashMap<LogKind, u64>,
    pub profiles: HashMap<UserId, String>,
}

impl LogBook {
    fn apply(&mut self, event: &Event) {
        match event {
            Event::LogEntryCreated { entry } => {
                let last = self.last_number.entry(entry.kind).or_default();
                *last = (*last).max(entry.number);
                self.entries.push(entry.clone());
            }
            Event::ProfileSaved { user_id, full_name } => {
                self.profiles.insert(*user_id, full_name.clone());
            }
            _ => {}
        }
    }
}

// ── Store ────────────────────────────────────────────────

/// In-memory booking store made durable by an event journal.
///
/// Every room sits behind its own `RwLock`; a booking is checked for overlap
/// and journaled while that lock is held, so two racing creations for one
/// room are decided one after the other.
pub struct JournalStore {
    pub(super) rooms: Arc<DashMap<RoomId, SharedRoomState>>,
    pub(super) booking_index: Arc<DashMap<BookingId, RoomId>>,
    /// Lowercased room name → id.
    pub(super) room_names: Arc<DashMap<String, RoomId>>,
    /// Serializes room creation so name uniqueness holds.
    pub(super) catalog: Arc<Mutex<()>>,
    pub(super) logbook: Arc<RwLock<LogBook>>,
    /// Mutations hold this for reading, compaction for writing. Always taken
    /// before any room lock.
    pub(super) gate: Arc<RwLock<()>>,
    pub(super) next_room_id: AtomicI64,
    pub(super) next_booking_id: AtomicI64,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    path: PathBuf,
}

/// Applies a room-scoped event. Caller holds the room's write lock.
pub(super) fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    index: &DashMap<BookingId, RoomId>,
) {
    match event {
        Event::RoomDeactivated { .. } => rs.room.is_active = false,
        Event::RoomActivated { .. } => rs.room.is_active = true,
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingCancelled { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        Event::BookingsSwept { cutoff, .. } => {
            for b in rs.bookings.iter().filter(|b| b.range.end() < *cutoff) {
                index.remove(&b.id);
            }
            rs.sweep(*cutoff);
        }
        Event::Watermark { .. }
        | Event::RoomCreated { .. }
        | Event::LogEntryCreated { .. }
        | Event::ProfileSaved { .. } => {}
    }
}

fn event_room_id(event: &Event) -> Option<RoomId> {
    match event {
        Event::RoomDeactivated { id } | Event::RoomActivated { id } => Some(*id),
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::BookingCancelled { room_id, .. } | Event::BookingsSwept { room_id, .. } => {
            Some(*room_id)
        }
        _ => None,
    }
}

/// Sends the event to the group-commit writer and waits for the fsync.
async fn journal_append(
    journal_tx: &mpsc::Sender<JournalCommand>,
    event: &Event,
) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    journal_tx
        .send(JournalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
    rx.await
        .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
        .map_err(|e| StoreError::Journal(e.to_string()))
}

impl JournalStore {
    /// Replays the journal at `path` and starts the writer task. Must be
    /// called inside a Tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let replay = Journal::replay(&path)?;
        if replay.damaged_tail {
            tracing::warn!(
                "journal {} has a damaged tail; recovered {} events",
                path.display(),
                replay.events.len()
            );
        }

        let index = DashMap::new();
        let mut rooms: BTreeMap<RoomId, RoomState> = BTreeMap::new();
        let mut logbook = LogBook::default();
        let mut next_room = 1i64;
        let mut next_booking = 1i64;

        for event in &replay.events {
            match event {
                Event::Watermark {
                    next_room: r,
                    next_booking: b,
                } => {
                    next_room = next_room.max(r.0);
                    next_booking = next_booking.max(b.0);
                }
                Event::RoomCreated { id, name } => {
                    next_room = next_room.max(id.0 + 1);
                    rooms.insert(
                        *id,
                        RoomState::new(Room {
                            id: *id,
                            name: name.clone(),
                            is_active: true,
                        }),
                    );
                }
                Event::LogEntryCreated { .. } | Event::ProfileSaved { .. } => logbook.apply(event),
                other => {
                    if let Event::BookingCreated { booking } = other {
                        next_booking = next_booking.max(booking.id.0 + 1);
                    }
                    let Some(rs) = event_room_id(other).and_then(|id| rooms.get_mut(&id)) else {
                        continue;
                    };
                    if let Event::BookingCreated { booking } = other
                        && let Some(existing) = rs.overlapping(&booking.range).next()
                    {
                        tracing::warn!(
                            "journal: booking {} overlaps booking {} in room {}; skipped",
                            booking.id,
                            existing.id,
                            rs.room.id
                        );
                        continue;
                    }
                    apply_to_room(rs, other, &index);
                }
            }
        }

        let journal = Journal::open(&path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let room_names = DashMap::new();
        let state = DashMap::new();
        for (id, rs) in rooms {
            room_names.insert(rs.room.name.to_lowercase(), id);
            state.insert(id, Arc::new(RwLock::new(rs)));
        }
        tracing::info!(
            "store opened: {} rooms, {} bookings, {} log entries",
            state.len(),
            index.len(),
            logbook.entries.len()
        );

        Ok(Self {
            rooms: Arc::new(state),
            booking_index: Arc::new(index),
            room_names: Arc::new(room_names),
            catalog: Arc::new(Mutex::new(())),
            logbook: Arc::new(RwLock::new(logbook)),
            gate: Arc::new(RwLock::new(())),
            next_room_id: AtomicI64::new(next_room),
            next_booking_id: AtomicI64::new(next_booking),
            journal_tx,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Journals `event`, then runs `apply` with it. Both run on a task of
    /// their own, so a caller that stops waiting never leaves a durable event
    /// unapplied in memory. Locks captured by `apply` and the `gate` guard
    /// are held until `apply` returns.
    pub(super) async fn commit<F>(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        event: Event,
        apply: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        let journal_tx = self.journal_tx.clone();
        let task = tokio::spawn(async move {
            let _gate = gate;
            journal_append(&journal_tx, &event).await?;
            apply(&event);
            Ok(())
        });
        task.await
            .map_err(|e| StoreError::Journal(format!("commit task failed: {e}")))?
    }

    /// [`commit`](Self::commit) for a room-scoped event, applied under the
    /// room's write lock.
    pub(super) async fn commit_to_room(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        guard: OwnedRwLockWriteGuard<RoomState>,
        event: Event,
    ) -> Result<(), StoreError> {
        let index = self.booking_index.clone();
        self.commit(gate, event, move |event| {
            let mut guard = guard;
            apply_to_room(&mut guard, event, &index);
        })
        .await
    }

    pub(super) async fn read_gate(&self) -> OwnedRwLockReadGuard<()> {
        self.gate.clone().read_owned().await
    }

    pub(super) fn get_room_state(&self, id: RoomId) -> Option<SharedRoomState> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_index.len()
    }
}

#[async_trait]
impl BookingRepository for JournalStore {
    async fn create(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        self.book(booking).await
    }

    async fn delete(&self, id: BookingId) -> Result<Booking, StoreError> {
        self.cancel(id).await
    }

    async fn get_by_id(&self, id: BookingId) -> Result<Booking, StoreError> {
        self.booking(id).await
    }

    async fn list_by_room_and_interval(
        &self,
        room_id: RoomId,
        range: &TimeRange,
    ) -> Result<Vec<Booking>, StoreError> {
        self.bookings_in_range(room_id, range).await
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.bookings_of_user(user_id, from).await)
    }

    async fn any_overlap(&self, room_id: RoomId, range: &TimeRange) -> Result<bool, StoreError> {
        self.has_overlap(room_id, range).await
    }

    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.sweep_ended_before(cutoff).await
    }
}

#[async_trait]
impl RoomRepository for JournalStore {
    async fn create_room(&self, name: &str) -> Result<Room, StoreError> {
        self.add_room(name).await
    }

    async fn deactivate_room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.set_room_active(id, false).await
    }

    async fn activate_room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.set_room_active(id, true).await
    }

    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.rooms(true).await)
    }

    async fn list_all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.rooms(false).await)
    }

    async fn get_room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.room(id).await
    }
}

#[async_trait]
impl LogRepository for JournalStore {
    async fn create_entry(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        self.append_log_entry(entry).await
    }

    async fn list_entries_by_user(&self, user_id: UserId) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.log_entries_of(user_id).await)
    }

    async fn get_entry(&self, kind: LogKind, number: u64) -> Result<Option<LogEntry>, StoreError> {
        Ok(self.log_entry(kind, number).await)
    }

    async fn list_entries_since(&self, from: DateTime<Utc>) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.log_entries_since(from).await)
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<String>, StoreError> {
        Ok(self.profile(user_id).await)
    }

    async fn save_profile(&self, user_id: UserId, full_name: &str) -> Result<(), StoreError> {
        self.store_profile(user_id, full_name).await
    }
}
