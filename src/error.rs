use crate::model::{BookingId, RoomId};
use crate::store::StoreError;

/// How the conversation layer reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input; the user stays on the same step.
    Validation,
    /// Lost a race or slot taken; a gentle warning.
    Conflict,
    NotFound,
    /// Storage or transport trouble; logged, reported to the operator.
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    InvalidTimeRange,
    InvalidInputData(&'static str),
    InvalidRoomName,
    PastTimeNotAllowed,
    OverlapsExisting,
    BookingNotFound(BookingId),
    RoomNotFound(RoomId),
    RoomInactive(RoomId),
    RoomAlreadyExists(String),
    NoRoomsAvailable,
    Forbidden,
    Storage(StoreError),
}

impl BookingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BookingError::InvalidTimeRange
            | BookingError::InvalidInputData(_)
            | BookingError::InvalidRoomName
            | BookingError::PastTimeNotAllowed
            | BookingError::RoomAlreadyExists(_) => ErrorClass::Validation,
            BookingError::OverlapsExisting | BookingError::Forbidden => ErrorClass::Conflict,
            BookingError::BookingNotFound(_)
            | BookingError::RoomNotFound(_)
            | BookingError::RoomInactive(_)
            | BookingError::NoRoomsAvailable => ErrorClass::NotFound,
            BookingError::Storage(_) => ErrorClass::Infrastructure,
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidTimeRange => write!(f, "invalid time range: end must be after start"),
            BookingError::InvalidInputData(msg) => write!(f, "invalid input: {msg}"),
            BookingError::InvalidRoomName => write!(f, "invalid room name"),
            BookingError::PastTimeNotAllowed => write!(f, "booking in the past is not allowed"),
            BookingError::OverlapsExisting => write!(f, "time range overlaps an existing booking"),
            BookingError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            BookingError::RoomInactive(id) => write!(f, "room is inactive: {id}"),
            BookingError::RoomAlreadyExists(name) => write!(f, "room already exists: {name}"),
            BookingError::NoRoomsAvailable => write!(f, "no rooms available"),
            BookingError::Forbidden => write!(f, "operation not permitted"),
            BookingError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Exclusion { .. } => BookingError::OverlapsExisting,
            StoreError::BookingNotFound(id) => BookingError::BookingNotFound(id),
            StoreError::RoomNotFound(id) => BookingError::RoomNotFound(id),
            StoreError::RoomInactive(id) => BookingError::RoomInactive(id),
            StoreError::RoomAlreadyExists(name) => BookingError::RoomAlreadyExists(name),
            StoreError::LimitExceeded(msg) => BookingError::InvalidInputData(msg),
            other @ StoreError::Journal(_) => BookingError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_maps_to_overlap() {
        let e: BookingError = StoreError::Exclusion {
            room_id: RoomId(1),
            existing: BookingId(2),
        }
        .into();
        assert_eq!(e, BookingError::OverlapsExisting);
        assert_eq!(e.class(), ErrorClass::Conflict);
    }

    #[test]
    fn journal_failure_is_infrastructure() {
        let e: BookingError = StoreError::Journal("disk full".into()).into();
        assert_eq!(e.class(), ErrorClass::Infrastructure);
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn classes() {
        assert_eq!(BookingError::InvalidTimeRange.class(), ErrorClass::Validation);
        assert_eq!(BookingError::PastTimeNotAllowed.class(), ErrorClass::Validation);
        assert_eq!(BookingError::BookingNotFound(BookingId(1)).class(), ErrorClass::NotFound);
        assert_eq!(BookingError::NoRoomsAvailable.class(), ErrorClass::NotFound);
    }
}
