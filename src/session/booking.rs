use chrono::{NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::error::BookingError;
use crate::limits::{DURATION_CHOICES_MINUTES, SLOT_STEP_MINUTES};
use crate::model::{RoomId, TimeRange};

use super::{Draft, WizardStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStep {
    ChoosingRoom,
    ChoosingDate,
    ChoosingStartTime,
    ChoosingDuration,
    ConfirmingBooking,
}

impl WizardStep for BookingStep {
    fn previous(self) -> Option<Self> {
        match self {
            BookingStep::ChoosingRoom => None,
            BookingStep::ChoosingDate => Some(BookingStep::ChoosingRoom),
            BookingStep::ChoosingStartTime => Some(BookingStep::ChoosingDate),
            BookingStep::ChoosingDuration => Some(BookingStep::ChoosingStartTime),
            BookingStep::ConfirmingBooking => Some(BookingStep::ChoosingDuration),
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            BookingStep::ChoosingRoom => Some(BookingStep::ChoosingDate),
            BookingStep::ChoosingDate => Some(BookingStep::ChoosingStartTime),
            BookingStep::ChoosingStartTime => Some(BookingStep::ChoosingDuration),
            BookingStep::ChoosingDuration => Some(BookingStep::ConfirmingBooking),
            BookingStep::ConfirmingBooking => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingDraft {
    pub room_id: Option<RoomId>,
    pub room_name: Option<String>,
    /// Calendar page, in weeks from the current one.
    pub week_shift: i64,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: Option<u32>,
}

impl Draft<BookingStep> for BookingDraft {
    fn clear_from(&mut self, step: BookingStep) {
        match step {
            BookingStep::ChoosingRoom => *self = BookingDraft::default(),
            BookingStep::ChoosingDate => {
                self.date = None;
                self.start_time = None;
                self.duration_minutes = None;
            }
            BookingStep::ChoosingStartTime => {
                self.start_time = None;
                self.duration_minutes = None;
            }
            BookingStep::ChoosingDuration => self.duration_minutes = None,
            BookingStep::ConfirmingBooking => {}
        }
    }
}

impl BookingDraft {
    pub fn end_time(&self) -> Option<NaiveTime> {
        let start = self.start_time?;
        let minutes = self.duration_minutes?;
        let (end, wrapped) = start.overflowing_add_signed(TimeDelta::minutes(minutes.into()));
        (wrapped == 0).then_some(end)
    }

    /// The picked slot as instants, interpreting the wall clock in `tz`.
    pub fn range(&self, tz: Tz) -> Result<TimeRange, BookingError> {
        let (Some(date), Some(start), Some(minutes)) =
            (self.date, self.start_time, self.duration_minutes)
        else {
            return Err(BookingError::InvalidInputData("booking draft incomplete"));
        };
        let start = tz
            .from_local_datetime(&date.and_time(start))
            .earliest()
            .ok_or(BookingError::InvalidInputData("start does not exist in office time zone"))?;
        let end = start + TimeDelta::minutes(minutes.into());
        TimeRange::new(start, end)
    }
}

pub fn is_offered_duration(minutes: u32) -> bool {
    DURATION_CHOICES_MINUTES.contains(&minutes)
}

/// Parses a typed start time: `HH:MM` or a bare hour. Minutes must sit on
/// the half-hour grid.
pub fn parse_time_pick(input: &str) -> Result<NaiveTime, BookingError> {
    let input = input.trim();
    let owned;
    let text = if input.contains(':') {
        input
    } else {
        owned = format!("{input}:00");
        &owned
    };
    let time = NaiveTime::parse_from_str(text, "%H:%M")
        .map_err(|_| BookingError::InvalidInputData("time must look like HH:MM"))?;
    if time.minute() % SLOT_STEP_MINUTES != 0 {
        return Err(BookingError::InvalidInputData("time must be on the half hour"));
    }
    Ok(time)
}
