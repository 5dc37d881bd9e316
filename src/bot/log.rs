use crate::action::{Action, LogAction};
use crate::error::BookingError;
use crate::limits::LOG_LOOKBACK_WEEKS;
use crate::logbook::{
    CreateLogEntry, LogbookError, validate_comment, validate_full_name, validate_principal,
};
use crate::model::{LogKind, MessageId};
use crate::session::{Back, LogDraft, LogStep, LogWizard, Session, SessionLookup, Wizard};
use crate::view::{Button, Reply, View};

use super::booking::{day_row, week_paging};
use super::calendar::{clamp_log_shift, is_loggable_day, log_calendar};
use super::{Bot, BotError, Ctx, nav_row};

/// Typed in place of a comment to leave it empty.
const NO_COMMENT: &str = "-";

fn log(a: LogAction) -> Action {
    Action::Log(a)
}

fn log_nav() -> Vec<Button> {
    nav_row(log(LogAction::Back), log(LogAction::Discard))
}

fn missing(what: &'static str) -> BotError {
    BookingError::InvalidInputData(what).into()
}

impl Bot {
    pub(super) async fn start_log(&self, ctx: &Ctx) -> Result<(), BotError> {
        let known_name = self.logbook.profile(ctx.user_id).await?;
        let wizard: LogWizard = Wizard::new(
            LogStep::ChoosingKind,
            ctx.chat_id,
            LogDraft::with_known_name(known_name),
        );
        self.advance_log(ctx, None, wizard).await
    }

    pub(super) async fn on_log_action(&self, ctx: &Ctx, action: LogAction) -> Result<(), BotError> {
        let mut w = match self.sessions.get(ctx.user_id) {
            SessionLookup::Found(Session::Log(w)) => w,
            SessionLookup::Expired => return self.timed_out(ctx).await,
            _ => return self.stale(ctx).await,
        };

        match (w.step, action) {
            (_, LogAction::Discard) => {
                self.sessions.remove(ctx.user_id);
                self.show(ctx, ctx.message_id, View::LogDiscarded).await?;
                return Ok(());
            }
            (_, LogAction::Back) => {
                if w.back() == Back::Exit {
                    self.sessions.remove(ctx.user_id);
                    let is_admin = ctx.role.is_admin();
                    self.show(ctx, ctx.message_id, View::MainMenu { is_admin }).await?;
                    return Ok(());
                }
            }
            (LogStep::ChoosingKind, LogAction::Kind(kind)) => {
                w.data.kind = Some(kind);
                w.forward();
            }
            (LogStep::ChoosingDate, LogAction::Week(shift)) => {
                w.data.week_shift = clamp_log_shift(shift);
            }
            (LogStep::ChoosingDate, LogAction::Date(date)) => {
                if !is_loggable_day(self.today(), date) {
                    return Err(BookingError::InvalidInputData("date is outside the log window").into());
                }
                w.data.date = Some(date);
                w.forward();
            }
            (LogStep::Confirming, LogAction::Confirm) => return self.confirm_log(ctx, w).await,
            _ => return self.stale(ctx).await,
        }

        self.advance_log(ctx, ctx.message_id, w).await
    }

    /// A rejected value keeps the wizard on the same step.
    pub(super) async fn log_text(&self, ctx: &Ctx, mut w: LogWizard, text: &str) -> Result<(), BotError> {
        match w.step {
            LogStep::EnteringFullName => {
                w.data.full_name = Some(validate_full_name(text)?.to_string());
            }
            LogStep::EnteringPrincipal => {
                w.data.principal = Some(validate_principal(text)?.to_string());
            }
            LogStep::EnteringComment => {
                let comment = if text.trim() == NO_COMMENT {
                    ""
                } else {
                    validate_comment(text)?
                };
                w.data.comment = Some(comment.to_string());
            }
            _ => return Err(BookingError::InvalidInputData("use the buttons").into()),
        }
        w.forward();
        self.advance_log(ctx, None, w).await
    }

    async fn advance_log(
        &self,
        ctx: &Ctx,
        target: Option<MessageId>,
        mut w: LogWizard,
    ) -> Result<(), BotError> {
        let reply = self.log_step(&w)?;
        w.message_id = Some(self.show(ctx, target, reply).await?);
        self.sessions.put(ctx.user_id, Session::Log(w));
        Ok(())
    }

    fn log_step(&self, w: &LogWizard) -> Result<Reply, BotError> {
        let d = &w.data;
        let reply = match w.step {
            LogStep::ChoosingKind => Reply::new(View::AskLogKind)
                .row(vec![
                    Button::new("Agreement", log(LogAction::Kind(LogKind::Agreement))),
                    Button::new("Request", log(LogAction::Kind(LogKind::Request))),
                ])
                .row(log_nav()),
            LogStep::ChoosingDate => {
                let kind = d.kind.ok_or_else(|| missing("kind missing"))?;
                let days = log_calendar(self.today(), d.week_shift);
                let row = day_row(&days, |date| log(LogAction::Date(date)));
                Reply::new(View::LogCalendar { kind, days })
                    .row(row)
                    .row(week_paging(d.week_shift, -LOG_LOOKBACK_WEEKS, 0, |s| {
                        log(LogAction::Week(s))
                    }))
                    .row(log_nav())
            }
            LogStep::EnteringFullName => Reply::new(View::AskFullName).row(log_nav()),
            LogStep::EnteringPrincipal => Reply::new(View::AskPrincipal).row(log_nav()),
            LogStep::EnteringComment => Reply::new(View::AskComment).row(log_nav()),
            LogStep::Confirming => {
                let kind = d.kind.ok_or_else(|| missing("kind missing"))?;
                let date = d.date.ok_or_else(|| missing("date missing"))?;
                let full_name = d.author().ok_or_else(|| missing("name missing"))?;
                Reply::new(View::ConfirmLogEntry {
                    kind,
                    date,
                    full_name: full_name.to_string(),
                    principal: d.principal.clone().unwrap_or_default(),
                    comment: d.comment.clone().unwrap_or_default(),
                })
                .row(vec![Button::new("Confirm", log(LogAction::Confirm))])
                .row(log_nav())
            }
        };
        Ok(reply)
    }

    async fn confirm_log(&self, ctx: &Ctx, w: LogWizard) -> Result<(), BotError> {
        let d = &w.data;
        let (Some(kind), Some(date), Some(full_name)) = (d.kind, d.date, d.author()) else {
            self.sessions.remove(ctx.user_id);
            return Err(missing("log entry incomplete"));
        };
        let result = self
            .logbook
            .create_entry(CreateLogEntry {
                kind,
                user_id: ctx.user_id,
                full_name: full_name.to_string(),
                date,
                principal: d.principal.clone().unwrap_or_default(),
                comment: d.comment.clone().unwrap_or_default(),
            })
            .await;
        self.sessions.remove(ctx.user_id);
        let entry = result?;
        self.show(ctx, ctx.message_id, View::LogEntryCreated { entry }).await?;
        Ok(())
    }

    pub(super) async fn my_log_entries(&self, ctx: &Ctx) -> Result<(), BotError> {
        let entries = self.logbook.list_user_entries(ctx.user_id).await?;
        self.reply(ctx, View::MyLogEntries { entries }).await
    }

    /// `/logfind A12`.
    pub(super) async fn find_log_entry(&self, ctx: &Ctx, args: &str) -> Result<(), BotError> {
        let (kind, number) = LogKind::parse_number(args).ok_or(LogbookError::InvalidNumber)?;
        let entry = self.logbook.find_entry(kind, number).await?;
        self.reply(ctx, View::LogEntryFound { entry }).await
    }

    pub(super) async fn export_log(&self, ctx: &Ctx) -> Result<(), BotError> {
        for report in self.logbook.export_reports().await? {
            self.reply(ctx, View::LogReport { report }).await?;
        }
        Ok(())
    }
}
