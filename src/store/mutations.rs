use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, oneshot};

use crate::limits::*;
use crate::model::*;

use super::conflict::check_exclusion;
use super::{JournalCommand, JournalStore, StoreError};

impl JournalStore {
    pub async fn book(&self, new: NewBooking) -> Result<Booking, StoreError> {
        let gate = self.read_gate().await;
        let rs = self
            .get_room_state(new.room_id)
            .ok_or(StoreError::RoomNotFound(new.room_id))?;
        let guard = rs.write_owned().await;
        if let Err(e) = check_exclusion(&guard, &new.range) {
            if matches!(e, StoreError::Exclusion { .. }) {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        let id = BookingId(self.next_booking_id.fetch_add(1, Ordering::Relaxed));
        let mut booking = new.into_booking(id);
        booking.room_name = guard.room.name.clone();
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.commit_to_room(gate, guard, event).await?;
        Ok(booking)
    }

    /// Removes a live booking. A second call for the same id reports
    /// `BookingNotFound` and changes nothing.
    pub async fn cancel(&self, id: BookingId) -> Result<Booking, StoreError> {
        let gate = self.read_gate().await;
        let room_id = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::BookingNotFound(id))?;
        let rs = self
            .get_room_state(room_id)
            .ok_or(StoreError::BookingNotFound(id))?;
        let guard = rs.write_owned().await;
        // Another cancel may have won while we waited for the lock.
        let booking = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(id))?;

        let event = Event::BookingCancelled { id, room_id };
        self.commit_to_room(gate, guard, event).await?;
        Ok(booking)
    }

    /// Deletes every booking whose end is strictly before `cutoff`.
    pub async fn sweep_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut removed = 0;
        for rs in states {
            let gate = self.read_gate().await;
            let guard = rs.write_owned().await;
            let stale = guard
                .bookings
                .iter()
                .filter(|b| b.range.end() < cutoff)
                .count();
            if stale == 0 {
                continue;
            }
            let event = Event::BookingsSwept {
                room_id: guard.room.id,
                cutoff,
            };
            self.commit_to_room(gate, guard, event).await?;
            removed += stale;
        }
        Ok(removed)
    }

    pub async fn add_room(&self, name: &str) -> Result<Room, StoreError> {
        let gate = self.read_gate().await;
        let catalog = self.catalog.clone().lock_owned().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }
        let key = name.to_lowercase();
        if self.room_names.contains_key(&key) {
            return Err(StoreError::RoomAlreadyExists(name.to_string()));
        }

        let id = RoomId(self.next_room_id.fetch_add(1, Ordering::Relaxed));
        let event = Event::RoomCreated {
            id,
            name: name.to_string(),
        };
        let room = Room {
            id,
            name: name.to_string(),
            is_active: true,
        };
        let created = room.clone();
        let rooms = self.rooms.clone();
        let names = self.room_names.clone();
        self.commit(gate, event, move |_| {
            let _catalog = catalog;
            rooms.insert(id, Arc::new(RwLock::new(RoomState::new(created))));
            names.insert(key, id);
        })
        .await?;
        Ok(room)
    }

    /// Toggles the soft-delete flag. Setting the current value again is a
    /// no-op that still returns the room.
    pub async fn set_room_active(&self, id: RoomId, active: bool) -> Result<Room, StoreError> {
        let gate = self.read_gate().await;
        let rs = self.get_room_state(id).ok_or(StoreError::RoomNotFound(id))?;
        let guard = rs.write_owned().await;
        if guard.room.is_active == active {
            return Ok(guard.room.clone());
        }
        let mut room = guard.room.clone();
        room.is_active = active;
        let event = if active {
            Event::RoomActivated { id }
        } else {
            Event::RoomDeactivated { id }
        };
        self.commit_to_room(gate, guard, event).await?;
        Ok(room)
    }

    pub async fn append_log_entry(&self, new: NewLogEntry) -> Result<LogEntry, StoreError> {
        let gate = self.read_gate().await;
        let book = self.logbook.clone().write_owned().await;
        let number = book.last_number.get(&new.kind).copied().unwrap_or(0) + 1;
        let entry = LogEntry {
            number,
            kind: new.kind,
            user_id: new.user_id,
            user_name: new.user_name,
            date: new.date,
            principal: new.principal,
            comment: new.comment,
            created_at: new.created_at,
        };
        let event = Event::LogEntryCreated {
            entry: entry.clone(),
        };
        self.commit(gate, event, move |event| {
            let mut book = book;
            book.apply(event);
        })
        .await?;
        Ok(entry)
    }

    pub async fn store_profile(&self, user_id: UserId, full_name: &str) -> Result<(), StoreError> {
        let gate = self.read_gate().await;
        let book = self.logbook.clone().write_owned().await;
        if book.profiles.get(&user_id).is_some_and(|n| n == full_name) {
            return Ok(());
        }
        let event = Event::ProfileSaved {
            user_id,
            full_name: full_name.to_string(),
        };
        self.commit(gate, event, move |event| {
            let mut book = book;
            book.apply(event);
        })
        .await
    }

    /// Rewrites the journal as the minimal event list recreating the current
    /// state. Blocks all mutations while the snapshot is taken and installed.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;

        let mut events = vec![Event::Watermark {
            next_room: RoomId(self.next_room_id.load(Ordering::Relaxed)),
            next_booking: BookingId(self.next_booking_id.load(Ordering::Relaxed)),
        }];
        let mut states: Vec<_> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        for (_, rs) in states {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.room.id,
                name: guard.room.name.clone(),
            });
            if !guard.room.is_active {
                events.push(Event::RoomDeactivated { id: guard.room.id });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }
        {
            let book = self.logbook.read().await;
            for entry in &book.entries {
                events.push(Event::LogEntryCreated {
                    entry: entry.clone(),
                });
            }
            let mut profiles: Vec<_> = book.profiles.iter().collect();
            profiles.sort_by_key(|(id, _)| **id);
            for (user_id, full_name) in profiles {
                events.push(Event::ProfileSaved {
                    user_id: *user_id,
                    full_name: full_name.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Snapshot {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))?;
        tracing::info!("journal compacted to {count} events");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::SinceSnapshot { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
