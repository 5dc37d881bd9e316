//! Hard limits and fixed grid constants.

/// Room names are bounded in characters, not bytes.
pub const MIN_ROOM_NAME_CHARS: usize = 2;
pub const MAX_ROOM_NAME_CHARS: usize = 50;

pub const MAX_NOTE_LEN: usize = 500;

/// Start times entered in the wizard must sit on this grid.
pub const SLOT_STEP_MINUTES: u32 = 30;

/// Durations offered by the wizard: 30 minutes to 4 hours in half-hour steps.
pub const DURATION_CHOICES_MINUTES: [u32; 8] = [30, 60, 90, 120, 150, 180, 210, 240];

/// How many weeks ahead the booking calendar can be paged.
pub const BOOKING_HORIZON_WEEKS: i64 = 8;

/// How many weeks back the log-entry calendar can be paged.
pub const LOG_LOOKBACK_WEEKS: i64 = 4;

/// `/schedule` shows this many days ahead.
pub const SCHEDULE_HORIZON_DAYS: i64 = 7;

pub const MIN_FULL_NAME_CHARS: usize = 2;
pub const MAX_FULL_NAME_CHARS: usize = 100;
pub const MAX_PRINCIPAL_CHARS: usize = 200;
pub const MAX_COMMENT_CHARS: usize = 1000;

/// `/logexport` covers entries created within this many days.
pub const REPORT_WINDOW_DAYS: i64 = 365;

/// Longest accepted gateway frame in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Longest accepted callback token.
pub const MAX_ACTION_LEN: usize = 64;

pub const MAX_ROOMS: usize = 1_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
