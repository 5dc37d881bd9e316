//! Callback tokens carried by inline buttons: `namespace:verb[:payload]`.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};

use crate::limits::MAX_ACTION_LEN;
use crate::model::{BookingId, LogKind, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookAction {
    Room(RoomId),
    Week(i64),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(u32),
    Confirm,
    Discard,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MyAction {
    List,
    Show(BookingId),
    Cancel(BookingId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    /// Asks to confirm deactivation.
    Deactivate(RoomId),
    ConfirmDeactivate(RoomId),
    Activate(RoomId),
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Kind(LogKind),
    Week(i64),
    Date(NaiveDate),
    Confirm,
    Discard,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Book(BookAction),
    My(MyAction),
    Admin(AdminAction),
    Log(LogAction),
    /// Disabled buttons such as past calendar days.
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    TooLong(usize),
    UnknownNamespace(String),
    UnknownVerb(String),
    BadPayload(String),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::TooLong(len) => write!(f, "action token too long: {len} bytes"),
            ActionError::UnknownNamespace(ns) => write!(f, "unknown action namespace: {ns}"),
            ActionError::UnknownVerb(verb) => write!(f, "unknown action: {verb}"),
            ActionError::BadPayload(p) => write!(f, "bad action payload: {p}"),
        }
    }
}

impl std::error::Error for ActionError {}

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";

fn payload<T: FromStr>(raw: Option<&str>) -> Result<T, ActionError> {
    let raw = raw.ok_or_else(|| ActionError::BadPayload(String::new()))?;
    raw.parse().map_err(|_| ActionError::BadPayload(raw.to_string()))
}

fn date(raw: Option<&str>) -> Result<NaiveDate, ActionError> {
    let raw = raw.ok_or_else(|| ActionError::BadPayload(String::new()))?;
    NaiveDate::parse_from_str(raw, DATE_FMT).map_err(|_| ActionError::BadPayload(raw.to_string()))
}

fn time(raw: Option<&str>) -> Result<NaiveTime, ActionError> {
    let raw = raw.ok_or_else(|| ActionError::BadPayload(String::new()))?;
    NaiveTime::parse_from_str(raw, TIME_FMT).map_err(|_| ActionError::BadPayload(raw.to_string()))
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_ACTION_LEN {
            return Err(ActionError::TooLong(s.len()));
        }
        if s == "noop" {
            return Ok(Action::Noop);
        }
        let mut parts = s.splitn(3, ':');
        let ns = parts.next().unwrap_or_default();
        let verb = parts.next().unwrap_or_default();
        let rest = parts.next();
        let unknown = || ActionError::UnknownVerb(format!("{ns}:{verb}"));

        let action = match ns {
            "bk" => Action::Book(match verb {
                "room" => BookAction::Room(RoomId(payload(rest)?)),
                "week" => BookAction::Week(payload(rest)?),
                "date" => BookAction::Date(date(rest)?),
                "time" => BookAction::Time(time(rest)?),
                "dur" => BookAction::Duration(payload(rest)?),
                "ok" => BookAction::Confirm,
                "no" => BookAction::Discard,
                "back" => BookAction::Back,
                _ => return Err(unknown()),
            }),
            "my" => Action::My(match verb {
                "list" => MyAction::List,
                "show" => MyAction::Show(BookingId(payload(rest)?)),
                "cancel" => MyAction::Cancel(BookingId(payload(rest)?)),
                _ => return Err(unknown()),
            }),
            "adm" => Action::Admin(match verb {
                "off" => AdminAction::Deactivate(RoomId(payload(rest)?)),
                "offok" => AdminAction::ConfirmDeactivate(RoomId(payload(rest)?)),
                "on" => AdminAction::Activate(RoomId(payload(rest)?)),
                "abort" => AdminAction::Abort,
                _ => return Err(unknown()),
            }),
            "log" => Action::Log(match verb {
                "kind" => {
                    let raw = rest.unwrap_or_default();
                    LogAction::Kind(
                        LogKind::parse(raw).ok_or_else(|| ActionError::BadPayload(raw.to_string()))?,
                    )
                }
                "week" => LogAction::Week(payload(rest)?),
                "date" => LogAction::Date(date(rest)?),
                "ok" => LogAction::Confirm,
                "no" => LogAction::Discard,
                "back" => LogAction::Back,
                _ => return Err(unknown()),
            }),
            other => return Err(ActionError::UnknownNamespace(other.to_string())),
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Noop => write!(f, "noop"),
            Action::Book(a) => match a {
                BookAction::Room(id) => write!(f, "bk:room:{id}"),
                BookAction::Week(shift) => write!(f, "bk:week:{shift}"),
                BookAction::Date(d) => write!(f, "bk:date:{}", d.format(DATE_FMT)),
                BookAction::Time(t) => write!(f, "bk:time:{}", t.format(TIME_FMT)),
                BookAction::Duration(m) => write!(f, "bk:dur:{m}"),
                BookAction::Confirm => write!(f, "bk:ok"),
                BookAction::Discard => write!(f, "bk:no"),
                BookAction::Back => write!(f, "bk:back"),
            },
            Action::My(a) => match a {
                MyAction::List => write!(f, "my:list"),
                MyAction::Show(id) => write!(f, "my:show:{id}"),
                MyAction::Cancel(id) => write!(f, "my:cancel:{id}"),
            },
            Action::Admin(a) => match a {
                AdminAction::Deactivate(id) => write!(f, "adm:off:{id}"),
                AdminAction::ConfirmDeactivate(id) => write!(f, "adm:offok:{id}"),
                AdminAction::Activate(id) => write!(f, "adm:on:{id}"),
                AdminAction::Abort => write!(f, "adm:abort"),
            },
            Action::Log(a) => match a {
                LogAction::Kind(k) => write!(f, "log:kind:{}", k.as_str()),
                LogAction::Week(shift) => write!(f, "log:week:{shift}"),
                LogAction::Date(d) => write!(f, "log:date:{}", d.format(DATE_FMT)),
                LogAction::Confirm => write!(f, "log:ok"),
                LogAction::Discard => write!(f, "log:no"),
                LogAction::Back => write!(f, "log:back"),
            },
        }
    }
}
