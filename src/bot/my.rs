use chrono::TimeDelta;

use crate::action::{Action, MyAction};
use crate::digest::local_midnight;
use crate::error::BookingError;
use crate::limits::SCHEDULE_HORIZON_DAYS;
use crate::model::MessageId;
use crate::view::{BookingView, Button, DaySchedule, Reply, View};

use super::{Bot, BotError, Ctx};

impl Bot {
    pub(super) async fn my_bookings(
        &self,
        ctx: &Ctx,
        target: Option<MessageId>,
    ) -> Result<(), BotError> {
        let bookings: Vec<BookingView> = self
            .service
            .list_user_bookings(ctx.user_id)
            .await?
            .iter()
            .map(|b| BookingView::new(b, self.tz))
            .collect();
        let buttons: Vec<Button> = bookings
            .iter()
            .map(|b| {
                let label = format!(
                    "{} {} {}",
                    b.date.format("%d.%m"),
                    b.start.format("%H:%M"),
                    b.room_name
                );
                Button::new(label, Action::My(MyAction::Show(b.id)))
            })
            .collect();
        let reply = Reply::new(View::MyBookings { bookings }).column(buttons);
        self.show(ctx, target, reply).await?;
        Ok(())
    }

    pub(super) async fn on_my_action(&self, ctx: &Ctx, action: MyAction) -> Result<(), BotError> {
        match action {
            MyAction::List => self.my_bookings(ctx, ctx.message_id).await,
            MyAction::Show(id) => {
                let booking = self.service.get_booking(id).await?;
                let can_cancel = booking.user_id == ctx.user_id || ctx.role.is_admin();
                let mut row = Vec::new();
                if can_cancel {
                    row.push(Button::new("Cancel booking", Action::My(MyAction::Cancel(id))));
                }
                row.push(Button::new("« Back", Action::My(MyAction::List)));
                let reply = Reply::new(View::BookingDetails {
                    booking: BookingView::new(&booking, self.tz),
                    can_cancel,
                })
                .row(row);
                self.show(ctx, ctx.message_id, reply).await?;
                Ok(())
            }
            MyAction::Cancel(id) => {
                let booking = self
                    .service
                    .cancel_booking_as(id, ctx.user_id, ctx.role.is_admin())
                    .await?;
                self.digest.wake_detached();
                let reply = Reply::new(View::BookingCancelled {
                    booking: BookingView::new(&booking, self.tz),
                })
                .row(vec![Button::new("My bookings", Action::My(MyAction::List))]);
                self.show(ctx, ctx.message_id, reply).await?;
                Ok(())
            }
        }
    }

    /// Every active room, day by day, from today on.
    pub(super) async fn week_schedule(&self, ctx: &Ctx) -> Result<(), BotError> {
        let today = self.today();
        let horizon = local_midnight(today + TimeDelta::days(SCHEDULE_HORIZON_DAYS), self.tz)
            .ok_or(BookingError::InvalidInputData("schedule horizon out of range"))?;
        let rooms = self.service.day_schedule(horizon).await?;
        let days = (0..SCHEDULE_HORIZON_DAYS)
            .map(|i| DaySchedule::new(today + TimeDelta::days(i), &rooms, self.tz))
            .collect();
        self.reply(ctx, View::WeekSchedule { days }).await
    }
}
