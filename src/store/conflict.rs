use crate::limits::MAX_BOOKINGS_PER_ROOM;
use crate::model::*;

use super::StoreError;

/// Exclusion check. Callers hold the room's write lock so the answer stays
/// true until the insert.
pub(crate) fn check_exclusion(rs: &RoomState, range: &TimeRange) -> Result<(), StoreError> {
    if !rs.room.is_active {
        return Err(StoreError::RoomInactive(rs.room.id));
    }
    if rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
        return Err(StoreError::LimitExceeded("too many bookings in room"));
    }
    if let Some(existing) = rs.overlapping(range).next() {
        return Err(StoreError::Exclusion {
            room_id: rs.room.id,
            existing: existing.id,
        });
    }
    Ok(())
}
