use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta};
use chrono_tz::Tz;

use crate::digest::local_midnight;
use crate::limits::{BOOKING_HORIZON_WEEKS, LOG_LOOKBACK_WEEKS, SLOT_STEP_MINUTES};
use crate::model::{Booking, TimeRange};
use crate::view::CalendarDay;

/// Monday-first week containing `today`, shifted by `shift` weeks.
pub fn week_of(today: NaiveDate, shift: i64) -> Vec<NaiveDate> {
    let monday = today - TimeDelta::days(today.weekday().num_days_from_monday().into());
    let first = monday + TimeDelta::weeks(shift);
    (0..7).map(|d| first + TimeDelta::days(d)).collect()
}

pub fn clamp_booking_shift(shift: i64) -> i64 {
    shift.clamp(0, BOOKING_HORIZON_WEEKS)
}

pub fn clamp_log_shift(shift: i64) -> i64 {
    shift.clamp(-LOG_LOOKBACK_WEEKS, 0)
}

/// Past days are disabled.
pub fn booking_calendar(today: NaiveDate, shift: i64) -> Vec<CalendarDay> {
    week_of(today, clamp_booking_shift(shift))
        .into_iter()
        .map(|date| CalendarDay {
            date,
            enabled: date >= today,
        })
        .collect()
}

pub fn is_bookable_day(today: NaiveDate, date: NaiveDate) -> bool {
    let last = week_of(today, BOOKING_HORIZON_WEEKS)[6];
    date >= today && date <= last
}

/// Future days are disabled.
pub fn log_calendar(today: NaiveDate, shift: i64) -> Vec<CalendarDay> {
    week_of(today, clamp_log_shift(shift))
        .into_iter()
        .map(|date| CalendarDay {
            date,
            enabled: date <= today,
        })
        .collect()
}

pub fn is_loggable_day(today: NaiveDate, date: NaiveDate) -> bool {
    let first = week_of(today, -LOG_LOOKBACK_WEEKS)[0];
    date <= today && date >= first
}

/// Grid start times on `date` that are still ahead of `now` and not inside
/// any of `busy`.
pub fn free_slots(
    date: NaiveDate,
    tz: Tz,
    now: chrono::DateTime<chrono::Utc>,
    busy: &[Booking],
) -> Vec<NaiveTime> {
    let Some(midnight) = local_midnight(date, tz) else {
        return Vec::new();
    };
    let step = TimeDelta::minutes(SLOT_STEP_MINUTES.into());
    let slots_per_day = 24 * 60 / SLOT_STEP_MINUTES;
    let ranges: Vec<TimeRange> = busy.iter().map(|b| b.range).collect();
    (0..slots_per_day)
        .map(|i| midnight + step * i as i32)
        .filter(|start| *start > now)
        .filter(|start| !ranges.iter().any(|r| r.contains(*start)))
        .map(|start| start.with_timezone(&tz))
        .filter(|local| local.date_naive() == date)
        .map(|local| local.time())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingId, RoomId, UserId};
    use chrono::{TimeZone, Utc};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn week_starts_on_monday() {
        // 2026-03-04 is a Wednesday.
        let week = week_of(d(4), 0);
        assert_eq!(week[0], d(2));
        assert_eq!(week[6], d(8));
        assert_eq!(week_of(d(4), 1)[0], d(9));
        assert_eq!(week_of(d(4), -1)[0], NaiveDate::from_ymd_opt(2026, 2, 23).unwrap());
    }

    #[test]
    fn booking_calendar_disables_past() {
        let days = booking_calendar(d(4), 0);
        let enabled: Vec<_> = days.iter().map(|c| c.enabled).collect();
        assert_eq!(enabled, vec![false, false, true, true, true, true, true]);
        assert!(booking_calendar(d(4), -3).iter().any(|c| !c.enabled));
        assert!(booking_calendar(d(4), 1).iter().all(|c| c.enabled));
    }

    #[test]
    fn log_calendar_disables_future() {
        let days = log_calendar(d(4), 0);
        let enabled: Vec<_> = days.iter().map(|c| c.enabled).collect();
        assert_eq!(enabled, vec![true, true, true, false, false, false, false]);
        assert!(log_calendar(d(4), 5).iter().any(|c| !c.enabled));
    }

    #[test]
    fn day_windows() {
        assert!(is_bookable_day(d(4), d(4)));
        assert!(!is_bookable_day(d(4), d(3)));
        assert!(!is_bookable_day(d(4), d(4) + TimeDelta::weeks(10)));
        assert!(is_loggable_day(d(4), d(1)));
        assert!(!is_loggable_day(d(4), d(5)));
    }

    #[test]
    fn free_slots_skip_past_and_busy() {
        let tz = chrono_tz::UTC;
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 20, 10, 0).unwrap();
        let busy = vec![Booking {
            id: BookingId(1),
            room_id: RoomId(1),
            room_name: "Blue".into(),
            user_id: UserId(1),
            user_name: "ann".into(),
            range: TimeRange::new(
                Utc.with_ymd_and_hms(2026, 3, 2, 21, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap(),
            )
            .unwrap(),
            note: String::new(),
        }];
        let slots = free_slots(d(2), tz, now, &busy);
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(
            slots,
            vec![hm(20, 30), hm(22, 0), hm(22, 30), hm(23, 0), hm(23, 30)]
        );
    }
}
