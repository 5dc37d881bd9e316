use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BookingError;
use crate::limits::{MAX_ROOM_NAME_CHARS, MIN_ROOM_NAME_CHARS};
use crate::model::*;
use crate::observability;
use crate::store::{BookingRepository, RoomRepository};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub note: String,
}

/// One room and its bookings for a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSchedule {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

/// Logs a write whose future was dropped before the store answered. The
/// store still finishes the write; only the answer is lost.
struct InFlight {
    what: &'static str,
    done: bool,
}

impl InFlight {
    fn new(what: &'static str) -> Self {
        Self { what, done: false }
    }

    fn finish(mut self) {
        self.done = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!("{} abandoned in flight; result not reported", self.what);
        }
    }
}

/// Business rules around the storage ports. Holds no locks of its own;
/// the store's room exclusion is the only serialization point.
pub struct BookingService {
    bookings: Arc<dyn BookingRepository>,
    rooms: Arc<dyn RoomRepository>,
    clock: Clock,
    overlap_precheck: bool,
}

impl BookingService {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        rooms: Arc<dyn RoomRepository>,
        clock: Clock,
        overlap_precheck: bool,
    ) -> Self {
        Self {
            bookings,
            rooms,
            clock,
            overlap_precheck,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Fails with `PastTimeNotAllowed` when `start` is not in the future.
    pub fn ensure_future(&self, start: DateTime<Utc>) -> Result<(), BookingError> {
        if start <= self.now() {
            return Err(BookingError::PastTimeNotAllowed);
        }
        Ok(())
    }

    /// Fails with `PastTimeNotAllowed` once `end` lies before now. A booking
    /// already under way is still accepted.
    pub fn ensure_not_ended(&self, end: DateTime<Utc>) -> Result<(), BookingError> {
        if end < self.now() {
            return Err(BookingError::PastTimeNotAllowed);
        }
        Ok(())
    }

    pub async fn create_booking(&self, cmd: CreateBooking) -> Result<Booking, BookingError> {
        let range = TimeRange::new(cmd.start, cmd.end)?;
        if cmd.room_id.is_zero() || cmd.user_id.is_zero() {
            return Err(BookingError::InvalidInputData("zero identifier"));
        }
        let room = self.rooms.get_room(cmd.room_id).await?;
        let new = NewBooking::new(&room, cmd.user_id, cmd.user_name, range, cmd.note)?;

        // Advisory only: a racing writer can still slip in before `create`.
        if self.overlap_precheck && self.bookings.any_overlap(room.id, &range).await? {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(BookingError::OverlapsExisting);
        }

        let flight = InFlight::new("booking creation");
        let result = self.bookings.create(new).await;
        flight.finish();

        let booking = result?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "booking {} created: room {} {} by user {}",
            booking.id,
            booking.room_id,
            booking.range,
            booking.user_id
        );
        Ok(booking)
    }

    pub async fn cancel_booking(&self, id: BookingId) -> Result<Booking, BookingError> {
        let flight = InFlight::new("booking cancellation");
        let result = self.bookings.delete(id).await;
        flight.finish();

        let booking = result?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!("booking {id} cancelled");
        Ok(booking)
    }

    /// Only the owner or an administrator may cancel.
    pub async fn cancel_booking_as(
        &self,
        id: BookingId,
        user_id: UserId,
        is_admin: bool,
    ) -> Result<Booking, BookingError> {
        let booking = self.bookings.get_by_id(id).await?;
        if booking.user_id != user_id && !is_admin {
            return Err(BookingError::Forbidden);
        }
        self.cancel_booking(id).await
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, BookingError> {
        Ok(self.bookings.get_by_id(id).await?)
    }

    /// Bookings of `user_id` that have not ended yet.
    pub async fn list_user_bookings(&self, user_id: UserId) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_by_user(user_id, self.now()).await?)
    }

    /// Bookings of one room intersecting `[now, horizon_end)`.
    pub async fn list_room_bookings(
        &self,
        room_id: RoomId,
        horizon_end: DateTime<Utc>,
    ) -> Result<Vec<Booking>, BookingError> {
        let now = self.now();
        if horizon_end <= now {
            return Ok(Vec::new());
        }
        let window = TimeRange::new(now, horizon_end)?;
        Ok(self.bookings.list_by_room_and_interval(room_id, &window).await?)
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, BookingError> {
        let rooms = self.rooms.list_active_rooms().await?;
        if rooms.is_empty() {
            return Err(BookingError::NoRoomsAvailable);
        }
        Ok(rooms)
    }

    pub async fn list_all_rooms(&self) -> Result<Vec<Room>, BookingError> {
        Ok(self.rooms.list_all_rooms().await?)
    }

    pub async fn get_room(&self, id: RoomId) -> Result<Room, BookingError> {
        Ok(self.rooms.get_room(id).await?)
    }

    pub async fn admin_create_room(&self, name: &str) -> Result<Room, BookingError> {
        let name = validate_room_name(name)?;
        let room = self.rooms.create_room(name).await?;
        tracing::info!("room {} created: {}", room.id, room.name);
        Ok(room)
    }

    pub async fn admin_deactivate_room(&self, id: RoomId) -> Result<Room, BookingError> {
        let room = self.rooms.deactivate_room(id).await?;
        tracing::info!("room {id} deactivated");
        Ok(room)
    }

    pub async fn admin_activate_room(&self, id: RoomId) -> Result<Room, BookingError> {
        let room = self.rooms.activate_room(id).await?;
        tracing::info!("room {id} activated");
        Ok(room)
    }

    /// Deletes bookings that ended before `cutoff`.
    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, BookingError> {
        let removed = self.bookings.delete_ended_before(cutoff).await?;
        if removed > 0 {
            metrics::counter!(observability::BOOKINGS_SWEPT_TOTAL).increment(removed as u64);
            tracing::info!("swept {removed} bookings ended before {cutoff}");
        }
        Ok(removed)
    }

    /// Every active room with its bookings from now until `day_end`. Rooms
    /// without bookings are included.
    pub async fn day_schedule(
        &self,
        day_end: DateTime<Utc>,
    ) -> Result<Vec<RoomSchedule>, BookingError> {
        let rooms = self.rooms.list_active_rooms().await?;
        let mut out = Vec::with_capacity(rooms.len());
        for room in rooms {
            let bookings = self.list_room_bookings(room.id, day_end).await?;
            out.push(RoomSchedule { room, bookings });
        }
        Ok(out)
    }
}

/// Trims and bounds a room name by character count.
pub fn validate_room_name(name: &str) -> Result<&str, BookingError> {
    let name = name.trim();
    let chars = name.chars().count();
    if !(MIN_ROOM_NAME_CHARS..=MAX_ROOM_NAME_CHARS).contains(&chars) {
        return Err(BookingError::InvalidRoomName);
    }
    Ok(name)
}
