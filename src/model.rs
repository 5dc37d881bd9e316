use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::limits::MAX_NOTE_LEN;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(RoomId);
id_type!(UserId);
id_type!(BookingId);
id_type!(
    /// Chat as seen by the transport: a private dialog or a group.
    ChatId
);
id_type!(MessageId);

/// Half-open interval `[start, end)` in UTC.
///
/// Built only through [`TimeRange::new`], so `end > start` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Wire shape of [`TimeRange`]; decoding goes through [`TimeRange::new`].
#[derive(Deserialize)]
struct RawTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = BookingError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        TimeRange::new(raw.start, raw.end)
    }
}

impl TimeRange {
    /// Normalizes both instants to UTC. Instants at or before the Unix epoch
    /// count as unset.
    pub fn new<Tz: TimeZone>(start: DateTime<Tz>, end: DateTime<Tz>) -> Result<Self, BookingError> {
        let start = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        if start <= DateTime::UNIX_EPOCH || end <= start {
            return Err(BookingError::InvalidTimeRange);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains<Tz: TimeZone>(&self, instant: DateTime<Tz>) -> bool {
        let t = instant.with_timezone(&Utc);
        self.start <= t && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub is_active: bool,
}

/// A validated booking that the store has not numbered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub room_id: RoomId,
    pub room_name: String,
    pub user_id: UserId,
    pub user_name: String,
    pub range: TimeRange,
    pub note: String,
}

impl NewBooking {
    /// The room must be active; identifiers must be non-zero.
    pub fn new(
        room: &Room,
        user_id: UserId,
        user_name: impl Into<String>,
        range: TimeRange,
        note: impl Into<String>,
    ) -> Result<Self, BookingError> {
        if room.id.is_zero() {
            return Err(BookingError::InvalidInputData("room id is zero"));
        }
        if user_id.is_zero() {
            return Err(BookingError::InvalidInputData("user id is zero"));
        }
        if !room.is_active {
            return Err(BookingError::RoomInactive(room.id));
        }
        let note = note.into();
        if note.len() > MAX_NOTE_LEN {
            return Err(BookingError::InvalidInputData("note too long"));
        }
        Ok(Self {
            room_id: room.id,
            room_name: room.name.clone(),
            user_id,
            user_name: user_name.into(),
            range,
            note,
        })
    }

    pub fn into_booking(self, id: BookingId) -> Booking {
        Booking {
            id,
            room_id: self.room_id,
            room_name: self.room_name,
            user_id: self.user_id,
            user_name: self.user_name,
            range: self.range,
            note: self.note,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    /// Name of the room when the booking was made.
    pub room_name: String,
    pub user_id: UserId,
    pub user_name: String,
    pub range: TimeRange,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Agreement,
    Request,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Agreement => "agreement",
            LogKind::Request => "request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agreement" => Some(LogKind::Agreement),
            "request" => Some(LogKind::Request),
            _ => None,
        }
    }

    /// Letter in front of a printed entry number.
    pub fn code(self) -> char {
        match self {
            LogKind::Agreement => 'A',
            LogKind::Request => 'R',
        }
    }

    /// `A12` or `r7` → kind and number.
    pub fn parse_number(s: &str) -> Option<(Self, u64)> {
        let s = s.trim();
        let mut chars = s.chars();
        let kind = match chars.next()?.to_ascii_uppercase() {
            'A' => LogKind::Agreement,
            'R' => LogKind::Request,
            _ => return None,
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((kind, digits.parse().ok()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub kind: LogKind,
    pub user_id: UserId,
    pub user_name: String,
    pub date: NaiveDate,
    pub principal: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// A journal entry, numbered sequentially within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub number: u64,
    pub kind: LogKind,
    pub user_id: UserId,
    pub user_name: String,
    pub date: NaiveDate,
    pub principal: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Printed number, e.g. `A12`.
    pub fn label(&self) -> String {
        format!("{}{}", self.kind.code(), self.number)
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Live bookings sorted by `(start, id)`. Never overlapping.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.range.start(), booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.range.start(), b.id))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings intersecting `query`. Binary search skips everything starting
    /// at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start() < query.end());
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end() > query.start())
    }

    /// Drops bookings whose end is strictly before `cutoff`.
    pub fn sweep(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.bookings.len();
        self.bookings.retain(|b| b.range.end() >= cutoff);
        before - self.bookings.len()
    }
}

/// Journal record. Replaying these in order rebuilds the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Leads a compacted journal so ids are never reused after restart.
    Watermark { next_room: RoomId, next_booking: BookingId },
    RoomCreated { id: RoomId, name: String },
    RoomDeactivated { id: RoomId },
    RoomActivated { id: RoomId },
    BookingCreated { booking: Booking },
    BookingCancelled { id: BookingId, room_id: RoomId },
    BookingsSwept { room_id: RoomId, cutoff: DateTime<Utc> },
    LogEntryCreated { entry: LogEntry },
    ProfileSaved { user_id: UserId, full_name: String },
}
