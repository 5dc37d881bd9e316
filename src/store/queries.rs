use chrono::{DateTime, Utc};

use crate::model::*;

use super::{JournalStore, StoreError};

impl JournalStore {
    pub async fn booking(&self, id: BookingId) -> Result<Booking, StoreError> {
        let room_id = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::BookingNotFound(id))?;
        let rs = self
            .get_room_state(room_id)
            .ok_or(StoreError::BookingNotFound(id))?;
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(id))
    }

    pub async fn bookings_in_range(
        &self,
        room_id: RoomId,
        range: &TimeRange,
    ) -> Result<Vec<Booking>, StoreError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(range).cloned().collect())
    }

    pub async fn bookings_of_user(&self, user_id: UserId, from: DateTime<Utc>) -> Vec<Booking> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.user_id == user_id && b.range.end() > from)
                    .cloned(),
            );
        }
        out.sort_by_key(|b| (b.range.start(), b.id));
        out
    }

    pub async fn has_overlap(&self, room_id: RoomId, range: &TimeRange) -> Result<bool, StoreError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(range).next().is_some())
    }

    pub async fn room(&self, id: RoomId) -> Result<Room, StoreError> {
        let rs = self.get_room_state(id).ok_or(StoreError::RoomNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Rooms ordered by id, optionally only the active ones.
    pub async fn rooms(&self, active_only: bool) -> Vec<Room> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if !active_only || guard.room.is_active {
                out.push(guard.room.clone());
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Entries of one user, newest first.
    pub async fn log_entries_of(&self, user_id: UserId) -> Vec<LogEntry> {
        let book = self.logbook.read().await;
        let mut out: Vec<_> = book
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.number.cmp(&a.number)));
        out
    }

    pub async fn log_entry(&self, kind: LogKind, number: u64) -> Option<LogEntry> {
        let book = self.logbook.read().await;
        book.entries
            .iter()
            .find(|e| e.kind == kind && e.number == number)
            .cloned()
    }

    /// Entries created at or after `from`, oldest first.
    pub async fn log_entries_since(&self, from: DateTime<Utc>) -> Vec<LogEntry> {
        let book = self.logbook.read().await;
        let mut out: Vec<_> = book
            .entries
            .iter()
            .filter(|e| e.created_at >= from)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.number.cmp(&b.number)));
        out
    }

    pub async fn profile(&self, user_id: UserId) -> Option<String> {
        self.logbook.read().await.profiles.get(&user_id).cloned()
    }
}
