use chrono::{NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};

use crate::action::{Action, BookAction};
use crate::digest::local_midnight;
use crate::error::{BookingError, ErrorClass};
use crate::limits::{BOOKING_HORIZON_WEEKS, DURATION_CHOICES_MINUTES, SLOT_STEP_MINUTES};
use crate::model::{MessageId, Room};
use crate::observability;
use crate::service::CreateBooking;
use crate::session::{
    Back, BookingDraft, BookingStep, BookingWizard, Session, SessionLookup, Wizard,
    is_offered_duration, parse_time_pick,
};
use crate::view::{BookingView, Button, CalendarDay, Reply, View};

use super::calendar::{booking_calendar, clamp_booking_shift, free_slots, is_bookable_day};
use super::{Bot, BotError, Ctx, nav_row};

const SLOTS_PER_ROW: usize = 4;

fn book(a: BookAction) -> Action {
    Action::Book(a)
}

fn booking_nav() -> Vec<Button> {
    nav_row(book(BookAction::Back), book(BookAction::Discard))
}

pub(super) fn room_picker(rooms: Vec<Room>) -> Reply {
    let buttons: Vec<Button> = rooms
        .iter()
        .map(|r| Button::new(r.name.clone(), book(BookAction::Room(r.id))))
        .collect();
    Reply::new(View::RoomPicker { rooms })
        .column(buttons)
        .row(booking_nav())
}

/// One button per day. Disabled days carry `Noop`.
pub(super) fn day_row(days: &[CalendarDay], day_action: impl Fn(NaiveDate) -> Action) -> Vec<Button> {
    days.iter()
        .map(|day| {
            let label = day.date.format("%d.%m").to_string();
            if day.enabled {
                Button::new(label, day_action(day.date))
            } else {
                Button::new(label, Action::Noop)
            }
        })
        .collect()
}

pub(super) fn week_paging(
    shift: i64,
    min: i64,
    max: i64,
    page: impl Fn(i64) -> Action,
) -> Vec<Button> {
    let mut row = Vec::new();
    if shift > min {
        row.push(Button::new("‹", page(shift - 1)));
    }
    if shift < max {
        row.push(Button::new("›", page(shift + 1)));
    }
    row
}

fn on_grid(t: NaiveTime) -> bool {
    t.second() == 0 && t.minute() % SLOT_STEP_MINUTES == 0
}

impl Bot {
    pub(super) async fn start_booking(&self, ctx: &Ctx) -> Result<(), BotError> {
        let rooms = self.service.list_rooms().await?;
        let mut wizard: BookingWizard =
            Wizard::new(BookingStep::ChoosingRoom, ctx.chat_id, BookingDraft::default());
        wizard.message_id = Some(self.show(ctx, None, room_picker(rooms)).await?);
        self.sessions.begin(ctx.user_id, Session::Booking(wizard));
        Ok(())
    }

    pub(super) async fn on_book_action(&self, ctx: &Ctx, action: BookAction) -> Result<(), BotError> {
        let mut w = match self.sessions.get(ctx.user_id) {
            SessionLookup::Found(Session::Booking(w)) => w,
            SessionLookup::Expired => return self.timed_out(ctx).await,
            _ => return self.stale(ctx).await,
        };

        match (w.step, action) {
            (_, BookAction::Discard) => {
                self.sessions.remove(ctx.user_id);
                self.show(ctx, ctx.message_id, View::BookingDiscarded).await?;
                return Ok(());
            }
            (_, BookAction::Back) => {
                if w.back() == Back::Exit {
                    self.sessions.remove(ctx.user_id);
                    let is_admin = ctx.role.is_admin();
                    self.show(ctx, ctx.message_id, View::MainMenu { is_admin }).await?;
                    return Ok(());
                }
            }
            (BookingStep::ChoosingRoom, BookAction::Room(id)) => {
                let room = self.service.get_room(id).await?;
                if !room.is_active {
                    return Err(BookingError::RoomInactive(id).into());
                }
                w.data.room_id = Some(room.id);
                w.data.room_name = Some(room.name);
                w.forward();
            }
            (BookingStep::ChoosingDate, BookAction::Week(shift)) => {
                w.data.week_shift = clamp_booking_shift(shift);
            }
            (BookingStep::ChoosingDate, BookAction::Date(date)) => {
                let today = self.today();
                if date < today {
                    return Err(BookingError::PastTimeNotAllowed.into());
                }
                if !is_bookable_day(today, date) {
                    return Err(BookingError::InvalidInputData("date is beyond the booking window").into());
                }
                w.data.date = Some(date);
                w.forward();
            }
            (BookingStep::ChoosingStartTime, BookAction::Time(t)) => self.pick_start(&mut w, t)?,
            (BookingStep::ChoosingDuration, BookAction::Duration(minutes)) => {
                if !is_offered_duration(minutes) {
                    return Err(BookingError::InvalidInputData("duration is not offered").into());
                }
                w.data.duration_minutes = Some(minutes);
                if w.data.end_time().is_none() {
                    return Err(BookingError::InvalidInputData("booking must end the same day").into());
                }
                w.forward();
            }
            (BookingStep::ConfirmingBooking, BookAction::Confirm) => {
                return self.confirm_booking(ctx, w).await;
            }
            _ => return self.stale(ctx).await,
        }

        self.advance_booking(ctx, ctx.message_id, w).await
    }

    /// Typed input is only meaningful while choosing the start time.
    pub(super) async fn booking_text(
        &self,
        ctx: &Ctx,
        mut w: BookingWizard,
        text: &str,
    ) -> Result<(), BotError> {
        if w.step != BookingStep::ChoosingStartTime {
            return Err(BookingError::InvalidInputData("use the buttons").into());
        }
        let t = parse_time_pick(text)?;
        self.pick_start(&mut w, t)?;
        self.advance_booking(ctx, None, w).await
    }

    fn pick_start(&self, w: &mut BookingWizard, t: NaiveTime) -> Result<(), BookingError> {
        if !on_grid(t) {
            return Err(BookingError::InvalidInputData("time must be on the half hour"));
        }
        let date = w.data.date.ok_or(BookingError::InvalidInputData("date missing"))?;
        let start = self
            .tz
            .from_local_datetime(&date.and_time(t))
            .earliest()
            .ok_or(BookingError::InvalidInputData("start does not exist in office time zone"))?;
        self.service.ensure_future(start.with_timezone(&Utc))?;
        w.data.start_time = Some(t);
        w.forward();
        Ok(())
    }

    /// Shows the wizard's current step, then stores the wizard.
    async fn advance_booking(
        &self,
        ctx: &Ctx,
        target: Option<MessageId>,
        mut w: BookingWizard,
    ) -> Result<(), BotError> {
        let reply = self.booking_step(&w).await?;
        w.message_id = Some(self.show(ctx, target, reply).await?);
        self.sessions.put(ctx.user_id, Session::Booking(w));
        Ok(())
    }

    async fn booking_step(&self, w: &BookingWizard) -> Result<Reply, BotError> {
        let d = &w.data;
        let room_name = d.room_name.clone().unwrap_or_default();
        let reply = match w.step {
            BookingStep::ChoosingRoom => room_picker(self.service.list_rooms().await?),
            BookingStep::ChoosingDate => {
                let days = booking_calendar(self.today(), d.week_shift);
                let row = day_row(&days, |date| book(BookAction::Date(date)));
                Reply::new(View::BookingCalendar { room_name, days })
                    .row(row)
                    .row(week_paging(d.week_shift, 0, BOOKING_HORIZON_WEEKS, |s| {
                        book(BookAction::Week(s))
                    }))
                    .row(booking_nav())
            }
            BookingStep::ChoosingStartTime => {
                let date = d.date.ok_or(BookingError::InvalidInputData("date missing"))?;
                let room_id = d.room_id.ok_or(BookingError::InvalidInputData("room missing"))?;
                let (Some(day_start), Some(day_end)) = (
                    local_midnight(date, self.tz),
                    date.succ_opt().and_then(|next| local_midnight(next, self.tz)),
                ) else {
                    return Err(BookingError::InvalidInputData("date out of range").into());
                };
                let busy: Vec<_> = self
                    .service
                    .list_room_bookings(room_id, day_end)
                    .await?
                    .into_iter()
                    .filter(|b| b.range.end() > day_start)
                    .collect();
                let slots = free_slots(date, self.tz, self.service.now(), &busy);
                let buttons: Vec<Button> = slots
                    .iter()
                    .map(|t| Button::new(t.format("%H:%M").to_string(), book(BookAction::Time(*t))))
                    .collect();
                let mut reply = Reply::new(View::AskStartTime {
                    room_name,
                    date,
                    busy: busy.iter().map(|b| BookingView::new(b, self.tz)).collect(),
                    free_slots: slots,
                });
                for chunk in buttons.chunks(SLOTS_PER_ROW) {
                    reply = reply.row(chunk.to_vec());
                }
                reply.row(booking_nav())
            }
            BookingStep::ChoosingDuration => {
                let date = d.date.ok_or(BookingError::InvalidInputData("date missing"))?;
                let start_time = d
                    .start_time
                    .ok_or(BookingError::InvalidInputData("start time missing"))?;
                let durations: Vec<u32> = DURATION_CHOICES_MINUTES
                    .into_iter()
                    .filter(|m| {
                        start_time
                            .overflowing_add_signed(TimeDelta::minutes((*m).into()))
                            .1
                            == 0
                    })
                    .collect();
                let buttons: Vec<Button> = durations
                    .iter()
                    .map(|m| Button::new(format!("{m} min"), book(BookAction::Duration(*m))))
                    .collect();
                let mut reply = Reply::new(View::AskDuration {
                    room_name,
                    date,
                    start_time,
                    durations,
                });
                for chunk in buttons.chunks(SLOTS_PER_ROW) {
                    reply = reply.row(chunk.to_vec());
                }
                reply.row(booking_nav())
            }
            BookingStep::ConfirmingBooking => {
                let (Some(date), Some(start_time), Some(end_time)) =
                    (d.date, d.start_time, d.end_time())
                else {
                    return Err(BookingError::InvalidInputData("booking draft incomplete").into());
                };
                Reply::new(View::ConfirmBooking {
                    room_name,
                    date,
                    start_time,
                    end_time,
                })
                .row(vec![Button::new("Confirm", book(BookAction::Confirm))])
                .row(booking_nav())
            }
        };
        Ok(reply)
    }

    /// Re-checks the end against the clock, then writes. Every outcome ends
    /// the wizard; infrastructure failures propagate to the apology path.
    async fn confirm_booking(&self, ctx: &Ctx, w: BookingWizard) -> Result<(), BotError> {
        let outcome = match (w.data.room_id, w.data.range(self.tz)) {
            (Some(room_id), Ok(range)) => match self.service.ensure_not_ended(range.end()) {
                Ok(()) => {
                    self.service
                        .create_booking(CreateBooking {
                            room_id,
                            user_id: ctx.user_id,
                            user_name: ctx.user_name.clone(),
                            start: range.start(),
                            end: range.end(),
                            note: String::new(),
                        })
                        .await
                }
                Err(e) => Err(e),
            },
            (None, _) => Err(BookingError::InvalidInputData("room missing")),
            (_, Err(e)) => Err(e),
        };
        self.sessions.remove(ctx.user_id);

        match outcome {
            Ok(booking) => {
                self.digest.wake_detached();
                let booking = BookingView::new(&booking, self.tz);
                self.show(ctx, ctx.message_id, View::BookingCreated { booking })
                    .await?;
                Ok(())
            }
            Err(e) if e.class() != ErrorClass::Infrastructure => {
                tracing::info!("user {} booking rejected at confirmation: {e}", ctx.user_id);
                let err = BotError::from(e);
                metrics::counter!(
                    observability::BOOKING_ERRORS_TOTAL,
                    "class" => observability::class_label(err.class())
                )
                .increment(1);
                self.show(ctx, ctx.message_id, Reply::warning(err.warning(), err.to_string()))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
