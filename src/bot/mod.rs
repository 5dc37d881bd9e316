//! Conversation engine: turns chat updates into wizard transitions and
//! policy-service calls.
//!
//! Handlers propagate failures with `?`. [`Bot::handle`] decides what the user
//! sees: validation, conflict and not-found failures become a warning and
//! leave the stored session as it was; infrastructure failures are reported
//! to the operator chat and answered with an apology.

mod admin;
mod booking;
pub mod calendar;
mod log;
mod my;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::action::Action;
use crate::auth::{NotMember, Role, RoleCache};
use crate::chat::{ChatError, ChatKind, ChatPort, Sender, Update};
use crate::digest::ScheduleDigest;
use crate::error::{BookingError, ErrorClass};
use crate::logbook::{LogService, LogbookError};
use crate::model::{ChatId, MessageId, UserId};
use crate::observability;
use crate::service::BookingService;
use crate::session::{Session, SessionLookup, SessionStore};
use crate::view::{Button, Reply, View, Warning};

#[derive(Debug)]
pub enum BotError {
    Chat(ChatError),
    Booking(BookingError),
    Logbook(LogbookError),
}

impl BotError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BotError::Chat(_) => ErrorClass::Infrastructure,
            BotError::Booking(e) => e.class(),
            BotError::Logbook(LogbookError::Storage(_) | LogbookError::Export(_)) => {
                ErrorClass::Infrastructure
            }
            BotError::Logbook(LogbookError::EntryNotFound(..)) => ErrorClass::NotFound,
            BotError::Logbook(_) => ErrorClass::Validation,
        }
    }

    fn warning(&self) -> Warning {
        match self {
            BotError::Booking(e) => match e {
                BookingError::OverlapsExisting => Warning::SlotTaken,
                BookingError::PastTimeNotAllowed => Warning::PastTime,
                BookingError::InvalidRoomName => Warning::InvalidRoomName,
                BookingError::RoomAlreadyExists(_) => Warning::RoomExists,
                BookingError::NoRoomsAvailable => Warning::NoRooms,
                BookingError::Forbidden => Warning::Forbidden,
                BookingError::BookingNotFound(_)
                | BookingError::RoomNotFound(_)
                | BookingError::RoomInactive(_) => Warning::NotFound,
                BookingError::InvalidTimeRange
                | BookingError::InvalidInputData(_)
                | BookingError::Storage(_) => Warning::InvalidInput,
            },
            BotError::Logbook(LogbookError::EntryNotFound(..)) => Warning::NotFound,
            BotError::Chat(_) | BotError::Logbook(_) => Warning::InvalidInput,
        }
    }
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotError::Chat(e) => write!(f, "{e}"),
            BotError::Booking(e) => write!(f, "{e}"),
            BotError::Logbook(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BotError {}

impl From<ChatError> for BotError {
    fn from(e: ChatError) -> Self {
        BotError::Chat(e)
    }
}

impl From<BookingError> for BotError {
    fn from(e: BookingError) -> Self {
        BotError::Booking(e)
    }
}

impl From<LogbookError> for BotError {
    fn from(e: LogbookError) -> Self {
        BotError::Logbook(e)
    }
}

/// Who sent the update and where to answer.
#[derive(Debug, Clone)]
pub(crate) struct Ctx {
    pub user_id: UserId,
    pub user_name: String,
    pub chat_id: ChatId,
    /// The message whose button was pressed. `None` for typed text.
    pub message_id: Option<MessageId>,
    pub role: Role,
}

pub struct Bot {
    pub chat: Arc<dyn ChatPort>,
    pub service: Arc<BookingService>,
    pub logbook: Arc<LogService>,
    pub sessions: Arc<SessionStore>,
    pub roles: Arc<RoleCache>,
    pub digest: Arc<ScheduleDigest>,
    pub tz: Tz,
    pub operator_chat: Option<ChatId>,
}

/// `/cmd@botname args` → `cmd`.
fn command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let cmd = first.strip_prefix('/')?;
    Some(cmd.split_once('@').map_or(cmd, |(c, _)| c))
}

/// `/cmd args` → `args`.
fn command_args(text: &str) -> &str {
    let text = text.trim_start();
    text.split_once(char::is_whitespace)
        .map_or("", |(_, rest)| rest.trim())
}

impl Bot {
    /// Handles one update to completion. Never fails: errors are turned into
    /// replies here.
    pub async fn handle(&self, update: Update) {
        let started = Instant::now();
        let kind = update.kind_label();
        let user_id = update.sender().user_id;
        let chat_id = update.chat_id();

        let result = self.route(update).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::UPDATES_TOTAL, "kind" => kind, "status" => status)
            .increment(1);
        metrics::histogram!(observability::UPDATE_DURATION_SECONDS, "kind" => kind)
            .record(started.elapsed().as_secs_f64());

        if let Err(err) = result {
            self.recover(user_id, chat_id, err).await;
        }
    }

    async fn route(&self, update: Update) -> Result<(), BotError> {
        match update {
            Update::Message {
                chat_id,
                chat_kind: ChatKind::Group,
                from,
                text,
            } => self.on_group_message(chat_id, &from, &text).await,
            Update::Message {
                chat_id,
                chat_kind: ChatKind::Private,
                from,
                text,
            } => {
                let Some(ctx) = self.authorize(chat_id, None, from).await? else {
                    return Ok(());
                };
                self.on_text(&ctx, &text).await
            }
            Update::Callback {
                chat_id,
                message_id,
                from,
                data,
            } => {
                let Some(ctx) = self.authorize(chat_id, Some(message_id), from).await? else {
                    return Ok(());
                };
                self.on_callback(&ctx, &data).await
            }
        }
    }

    async fn recover(&self, user_id: UserId, chat_id: ChatId, err: BotError) {
        let class = err.class();
        metrics::counter!(
            observability::BOOKING_ERRORS_TOTAL,
            "class" => observability::class_label(class)
        )
        .increment(1);

        match err {
            // The transport is the way to the user; there is nobody to tell.
            BotError::Chat(e) => {
                tracing::warn!("reply to user {user_id} in chat {chat_id} failed: {e}");
            }
            err if class == ErrorClass::Infrastructure => {
                tracing::error!("update from user {user_id} failed: {err}");
                self.alert_operator(user_id, &err).await;
                if let Err(e) = self.chat.send(chat_id, &Reply::new(View::Apology)).await {
                    tracing::warn!("apology to user {user_id} failed: {e}");
                }
            }
            err => {
                tracing::debug!("user {user_id}: {err}");
                let reply = Reply::warning(err.warning(), err.to_string());
                if let Err(e) = self.chat.send(chat_id, &reply).await {
                    tracing::warn!("warning to user {user_id} failed: {e}");
                }
            }
        }
    }

    async fn alert_operator(&self, user_id: UserId, err: &BotError) {
        let Some(operator) = self.operator_chat else {
            return;
        };
        let alert = Reply::new(View::OperatorAlert {
            user_id,
            summary: err.to_string(),
        });
        match self.chat.send(operator, &alert).await {
            Ok(_) => metrics::counter!(observability::OPERATOR_ALERTS_TOTAL).increment(1),
            Err(e) => tracing::error!("operator alert failed: {e}"),
        }
    }

    /// `None` when the sender is not a member; they have been told so.
    async fn authorize(
        &self,
        chat_id: ChatId,
        message_id: Option<MessageId>,
        from: Sender,
    ) -> Result<Option<Ctx>, BotError> {
        match self.roles.get_role(from.user_id).await {
            Ok(role) => Ok(Some(Ctx {
                user_id: from.user_id,
                user_name: from.name,
                chat_id,
                message_id,
                role,
            })),
            Err(NotMember(_)) => {
                tracing::info!("user {} is not a member of the organization", from.user_id);
                self.chat.send(chat_id, &Reply::new(View::Unauthorized)).await?;
                Ok(None)
            }
        }
    }

    // ── Routing ──────────────────────────────────────────

    async fn on_group_message(
        &self,
        chat_id: ChatId,
        from: &Sender,
        text: &str,
    ) -> Result<(), BotError> {
        match command(text) {
            Some("register") => {
                if !self.roles.is_admin(from.user_id).await {
                    tracing::info!("user {} may not register chat {chat_id}", from.user_id);
                    return Ok(());
                }
                self.digest.register_group(chat_id);
                self.chat.send(chat_id, &Reply::new(View::GroupRegistered)).await?;
            }
            Some("schedule") => {
                let reply = self.digest.render().await?;
                self.chat.send(chat_id, &reply).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_text(&self, ctx: &Ctx, text: &str) -> Result<(), BotError> {
        if let Some(cmd) = command(text) {
            return self.on_command(ctx, cmd, command_args(text)).await;
        }
        match self.sessions.get(ctx.user_id) {
            SessionLookup::Found(Session::Booking(w)) => {
                self.booking_text(ctx, w, text).await
            }
            SessionLookup::Found(Session::RoomCreation(_)) => {
                self.room_name_text(ctx, text).await
            }
            SessionLookup::Found(Session::Log(w)) => self.log_text(ctx, w, text).await,
            SessionLookup::Expired => self.timed_out(ctx).await,
            SessionLookup::NotFound => self.reply(ctx, View::UnknownCommand).await,
        }
    }

    async fn on_command(&self, ctx: &Ctx, cmd: &str, args: &str) -> Result<(), BotError> {
        let is_admin = ctx.role.is_admin();
        match cmd {
            "start" => self.reply(ctx, View::MainMenu { is_admin }).await,
            "help" => self.reply(ctx, View::Help { is_admin }).await,
            "book" => self.start_booking(ctx).await,
            "my" => self.my_bookings(ctx, None).await,
            "schedule" => self.week_schedule(ctx).await,
            "log" => self.start_log(ctx).await,
            "mylog" => self.my_log_entries(ctx).await,
            "cancel" => {
                if let Some(session) = self.sessions.remove(ctx.user_id) {
                    tracing::debug!("user {}: {} wizard dropped", ctx.user_id, session.kind());
                }
                self.reply(ctx, View::MainMenu { is_admin }).await
            }
            "create_room" | "deactivate_room" | "activate_room" | "logfind" | "logexport"
                if !is_admin =>
            {
                self.reply(ctx, View::Unauthorized).await
            }
            "create_room" => self.start_room_creation(ctx).await,
            "deactivate_room" => self.deactivate_picker(ctx).await,
            "activate_room" => self.activate_picker(ctx).await,
            "logfind" => self.find_log_entry(ctx, args).await,
            "logexport" => self.export_log(ctx).await,
            _ => self.reply(ctx, View::UnknownCommand).await,
        }
    }

    async fn on_callback(&self, ctx: &Ctx, data: &str) -> Result<(), BotError> {
        let action = match data.parse::<Action>() {
            Ok(action) => action,
            Err(e) => {
                tracing::debug!("user {}: {e}", ctx.user_id);
                return self.stale(ctx).await;
            }
        };
        match action {
            Action::Noop => Ok(()),
            Action::Book(a) => self.on_book_action(ctx, a).await,
            Action::My(a) => self.on_my_action(ctx, a).await,
            Action::Admin(_) if !ctx.role.is_admin() => self.reply(ctx, View::Unauthorized).await,
            Action::Admin(a) => self.on_admin_action(ctx, a).await,
            Action::Log(a) => self.on_log_action(ctx, a).await,
        }
    }

    // ── Output helpers ───────────────────────────────────

    /// Edits `target` in place, or sends a new message when there is none.
    async fn show(
        &self,
        ctx: &Ctx,
        target: Option<MessageId>,
        reply: impl Into<Reply>,
    ) -> Result<MessageId, BotError> {
        let reply = reply.into();
        match target {
            Some(message_id) => {
                self.chat.edit(ctx.chat_id, message_id, &reply).await?;
                Ok(message_id)
            }
            None => Ok(self.chat.send(ctx.chat_id, &reply).await?),
        }
    }

    async fn reply(&self, ctx: &Ctx, reply: impl Into<Reply>) -> Result<(), BotError> {
        self.chat.send(ctx.chat_id, &reply.into()).await?;
        Ok(())
    }

    async fn stale(&self, ctx: &Ctx) -> Result<(), BotError> {
        self.reply(ctx, Reply::warning(Warning::StaleButton, "")).await
    }

    async fn timed_out(&self, ctx: &Ctx) -> Result<(), BotError> {
        self.reply(ctx, View::TimedOut).await
    }

    fn today(&self) -> NaiveDate {
        self.service.now().with_timezone(&self.tz).date_naive()
    }
}

/// Back and discard, shared by every wizard step.
fn nav_row(back: Action, discard: Action) -> Vec<Button> {
    vec![Button::new("« Back", back), Button::new("Cancel", discard)]
}
