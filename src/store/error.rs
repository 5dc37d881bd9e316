use crate::model::{BookingId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    BookingNotFound(BookingId),
    RoomNotFound(RoomId),
    RoomInactive(RoomId),
    RoomAlreadyExists(String),
    /// The room already holds a booking intersecting the requested range.
    Exclusion {
        room_id: RoomId,
        existing: BookingId,
    },
    LimitExceeded(&'static str),
    Journal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            StoreError::RoomInactive(id) => write!(f, "room is inactive: {id}"),
            StoreError::RoomAlreadyExists(name) => write!(f, "room already exists: {name}"),
            StoreError::Exclusion { room_id, existing } => {
                write!(f, "room {room_id} exclusion violated by booking {existing}")
            }
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
