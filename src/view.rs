//! Plain data handed to the chat transport. Wording, layout and escaping are
//! the transport's business; buttons carry the action tokens to send back.

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::action::Action;
use crate::logbook::LogReport;
use crate::model::{Booking, BookingId, LogEntry, LogKind, Room, UserId};
use crate::service::RoomSchedule;

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub action: Action,
}

impl Button {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// A booking with its instants shown as office-local wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub id: BookingId,
    pub room_name: String,
    pub user_id: UserId,
    pub user_name: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub note: String,
}

impl BookingView {
    pub fn new(b: &Booking, tz: Tz) -> Self {
        let start = b.range.start().with_timezone(&tz);
        let end = b.range.end().with_timezone(&tz);
        Self {
            id: b.id,
            room_name: b.room_name.clone(),
            user_id: b.user_id,
            user_name: b.user_name.clone(),
            date: start.date_naive(),
            start: start.time(),
            end: end.time(),
            note: b.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomDay {
    pub room_name: String,
    pub bookings: Vec<BookingView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub rooms: Vec<RoomDay>,
}

impl DaySchedule {
    pub fn new(date: NaiveDate, schedule: &[RoomSchedule], tz: Tz) -> Self {
        let rooms = schedule
            .iter()
            .map(|rs| RoomDay {
                room_name: rs.room.name.clone(),
                bookings: rs
                    .bookings
                    .iter()
                    .map(|b| BookingView::new(b, tz))
                    .filter(|v| v.date == date)
                    .collect(),
            })
            .collect();
        Self { date, rooms }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    SlotTaken,
    PastTime,
    InvalidInput,
    InvalidRoomName,
    RoomExists,
    NotFound,
    NoRooms,
    Forbidden,
    /// A button from a keyboard that no longer matches the conversation.
    StaleButton,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    MainMenu { is_admin: bool },
    Help { is_admin: bool },
    RoomPicker { rooms: Vec<Room> },
    BookingCalendar { room_name: String, days: Vec<CalendarDay> },
    AskStartTime {
        room_name: String,
        date: NaiveDate,
        busy: Vec<BookingView>,
        free_slots: Vec<NaiveTime>,
    },
    AskDuration {
        room_name: String,
        date: NaiveDate,
        start_time: NaiveTime,
        durations: Vec<u32>,
    },
    ConfirmBooking {
        room_name: String,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    BookingCreated { booking: BookingView },
    BookingDiscarded,
    MyBookings { bookings: Vec<BookingView> },
    BookingDetails { booking: BookingView, can_cancel: bool },
    BookingCancelled { booking: BookingView },
    WeekSchedule { days: Vec<DaySchedule> },
    Digest { schedule: DaySchedule },
    AskRoomName,
    RoomCreated { room: Room },
    DeactivatePicker { rooms: Vec<Room> },
    ConfirmDeactivate { room: Room },
    RoomDeactivated { room: Room },
    ActivatePicker { rooms: Vec<Room> },
    RoomActivated { room: Room },
    AskLogKind,
    LogCalendar { kind: LogKind, days: Vec<CalendarDay> },
    AskFullName,
    AskPrincipal,
    AskComment,
    ConfirmLogEntry {
        kind: LogKind,
        date: NaiveDate,
        full_name: String,
        principal: String,
        comment: String,
    },
    LogEntryCreated { entry: LogEntry },
    LogDiscarded,
    MyLogEntries { entries: Vec<LogEntry> },
    LogEntryFound { entry: LogEntry },
    /// An exported table, sent as a document named `report.file_name`.
    LogReport { report: LogReport },
    Warning { warning: Warning, detail: String },
    Apology,
    OperatorAlert { user_id: UserId, summary: String },
    GroupRegistered,
    Unauthorized,
    UnknownCommand,
    /// The wizard was dropped after sitting idle.
    TimedOut,
}

/// What gets sent or edited: a view plus its inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    #[serde(flatten)]
    pub view: View,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
}

impl Reply {
    pub fn new(view: View) -> Self {
        Self {
            view,
            buttons: Vec::new(),
        }
    }

    pub fn row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.buttons.push(row);
        }
        self
    }

    /// One button per row.
    pub fn column(mut self, buttons: impl IntoIterator<Item = Button>) -> Self {
        self.buttons.extend(buttons.into_iter().map(|b| vec![b]));
        self
    }

    pub fn warning(warning: Warning, detail: impl Into<String>) -> Self {
        Self::new(View::Warning {
            warning,
            detail: detail.into(),
        })
    }

    /// Every action on the keyboard, row by row.
    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.buttons.iter().flatten().map(|b| b.action)
    }
}

impl From<View> for Reply {
    fn from(view: View) -> Self {
        Reply::new(view)
    }
}
