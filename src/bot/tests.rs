use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use super::*;
use crate::action::{AdminAction, BookAction, LogAction, MyAction};
use crate::auth::{AuthError, MemberStatus, MembershipLookup};
use crate::chat::testing::{Outgoing, RecordingChat};
use crate::chat::{ChatError, ChatPort};
use crate::view::Reply;
use crate::logbook::CreateLogEntry;
use crate::model::{LogKind, Room};
use crate::service::CreateBooking;
use crate::session::BookingStep;
use crate::store::{JournalStore, StoreError};

const ADMIN: i64 = 1;
const MEMBER: i64 = 2;
const STRANGER: i64 = 3;
const OTHER_MEMBER: i64 = 4;
const OPERATOR: ChatId = ChatId(-999);

struct Members(HashMap<UserId, MemberStatus>);

#[async_trait]
impl MembershipLookup for Members {
    async fn member_status(&self, _chat_id: ChatId, user_id: UserId) -> Result<MemberStatus, AuthError> {
        Ok(self.0.get(&user_id).copied().unwrap_or(MemberStatus::Left))
    }
}

/// Fails private-chat traffic once `broken` is set; group chats still work.
struct BrokenPrivateChats {
    inner: Arc<RecordingChat>,
    broken: AtomicBool,
}

impl BrokenPrivateChats {
    fn check(&self, chat_id: ChatId) -> Result<(), ChatError> {
        if self.broken.load(Ordering::SeqCst) && chat_id.0 > 0 {
            return Err(ChatError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPort for BrokenPrivateChats {
    async fn send(&self, chat_id: ChatId, reply: &Reply) -> Result<MessageId, ChatError> {
        self.check(chat_id)?;
        self.inner.send(chat_id, reply).await
    }

    async fn edit(&self, chat_id: ChatId, message_id: MessageId, reply: &Reply) -> Result<(), ChatError> {
        self.check(chat_id)?;
        self.inner.edit(chat_id, message_id, reply).await
    }
}

struct Harness {
    bot: Bot,
    chat: Arc<RecordingChat>,
    service: Arc<BookingService>,
    sessions: Arc<SessionStore>,
    clock: Arc<Mutex<DateTime<Utc>>>,
    room: Room,
}

/// Monday 2026-03-02, 09:00 in Moscow.
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

async fn harness(name: &str) -> Harness {
    let dir = std::env::temp_dir().join("roombook_test_bot");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let store = Arc::new(JournalStore::open(path).unwrap());

    let cell = Arc::new(Mutex::new(t0()));
    let c = cell.clone();
    let clock: crate::service::Clock = Arc::new(move || *c.lock().unwrap());

    let service = Arc::new(BookingService::new(store.clone(), store.clone(), clock.clone(), true));
    let logbook = Arc::new(LogService::new(store, clock));
    let chat = Arc::new(RecordingChat::default());
    let members = Members(HashMap::from([
        (UserId(ADMIN), MemberStatus::Creator),
        (UserId(MEMBER), MemberStatus::Member),
        (UserId(OTHER_MEMBER), MemberStatus::Member),
        (UserId(STRANGER), MemberStatus::Left),
    ]));
    let roles = Arc::new(RoleCache::new(
        Arc::new(members),
        Some(ChatId(-100)),
        Duration::from_secs(300),
    ));
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(1800)));
    let tz = chrono_tz::Europe::Moscow;
    let digest = Arc::new(ScheduleDigest::new(chat.clone(), service.clone(), tz));

    let room = service.admin_create_room("Blue").await.unwrap();
    let bot = Bot {
        chat: chat.clone(),
        service: service.clone(),
        logbook,
        sessions: sessions.clone(),
        roles,
        digest,
        tz,
        operator_chat: Some(OPERATOR),
    };
    Harness {
        bot,
        chat,
        service,
        sessions,
        clock: cell,
        room,
    }
}

fn sender(user: i64) -> Sender {
    Sender {
        user_id: UserId(user),
        name: format!("user{user}"),
    }
}

fn text(user: i64, text: &str) -> Update {
    Update::Message {
        chat_id: ChatId(user),
        chat_kind: ChatKind::Private,
        from: sender(user),
        text: text.into(),
    }
}

fn group_text(user: i64, chat: i64, text: &str) -> Update {
    Update::Message {
        chat_id: ChatId(chat),
        chat_kind: ChatKind::Group,
        from: sender(user),
        text: text.into(),
    }
}

fn press(user: i64, message_id: MessageId, action: Action) -> Update {
    Update::Callback {
        chat_id: ChatId(user),
        message_id,
        from: sender(user),
        data: action.to_string(),
    }
}

fn last_view(h: &Harness) -> View {
    h.chat.last().expect("nothing sent").reply().view.clone()
}

fn last_id(h: &Harness) -> MessageId {
    match h.chat.last().expect("nothing sent") {
        Outgoing::Sent { message_id, .. } | Outgoing::Edited { message_id, .. } => message_id,
    }
}

fn booking_step(h: &Harness, user: i64) -> Option<BookingStep> {
    match h.sessions.get(UserId(user)) {
        SessionLookup::Found(Session::Booking(w)) => Some(w.step),
        _ => None,
    }
}

fn assert_warning(view: View, expected: Warning) {
    match view {
        View::Warning { warning, .. } => assert_eq!(warning, expected),
        other => panic!("expected {expected:?} warning, got {other:?}"),
    }
}

/// Drives the booking wizard up to the confirmation screen and returns the
/// message that holds it.
async fn walk_to_confirm(h: &Harness, user: i64, date: NaiveDate, start: &str, minutes: u32) -> MessageId {
    h.bot.handle(text(user, "/book")).await;
    let m = last_id(h);
    h.bot
        .handle(press(user, m, Action::Book(BookAction::Room(h.room.id))))
        .await;
    h.bot.handle(press(user, m, Action::Book(BookAction::Date(date)))).await;
    h.bot.handle(text(user, start)).await;
    let m = last_id(h);
    h.bot
        .handle(press(user, m, Action::Book(BookAction::Duration(minutes))))
        .await;
    m
}

#[test]
fn command_names() {
    assert_eq!(command("/book"), Some("book"));
    assert_eq!(command("  /book@roombot now"), Some("book"));
    assert_eq!(command("book"), None);
    assert_eq!(command(""), None);
}

#[tokio::test]
async fn books_a_room_end_to_end() {
    let h = harness("end_to_end.journal").await;

    h.bot.handle(text(MEMBER, "/book")).await;
    match last_view(&h) {
        View::RoomPicker { rooms } => assert_eq!(rooms, vec![h.room.clone()]),
        other => panic!("unexpected view: {other:?}"),
    }
    let m = last_id(&h);

    h.bot
        .handle(press(MEMBER, m, Action::Book(BookAction::Room(h.room.id))))
        .await;
    match h.chat.last() {
        Some(Outgoing::Edited {
            message_id,
            reply,
            ..
        }) => {
            assert_eq!(message_id, m);
            assert!(reply.actions().any(|a| a == Action::Book(BookAction::Date(day(3)))));
            let View::BookingCalendar { room_name, days } = reply.view else {
                panic!("expected the calendar");
            };
            assert_eq!(room_name, "Blue");
            assert!(days.iter().any(|d| d.date == day(3) && d.enabled));
        }
        other => panic!("expected an edit, got {other:?}"),
    }

    h.bot
        .handle(press(MEMBER, m, Action::Book(BookAction::Date(day(3)))))
        .await;
    match last_view(&h) {
        View::AskStartTime { free_slots, busy, .. } => {
            assert!(busy.is_empty());
            assert_eq!(free_slots.len(), 48);
        }
        other => panic!("unexpected view: {other:?}"),
    }

    h.bot.handle(text(MEMBER, "14:00")).await;
    let Some(Outgoing::Sent { reply, message_id, .. }) = h.chat.last() else {
        panic!("typed input answers with a new message");
    };
    assert!(matches!(reply.view, View::AskDuration { start_time, .. } if start_time == hm(14, 0)));
    let m = message_id;

    h.bot
        .handle(press(MEMBER, m, Action::Book(BookAction::Duration(60))))
        .await;
    match last_view(&h) {
        View::ConfirmBooking {
            start_time,
            end_time,
            ..
        } => {
            assert_eq!(start_time, hm(14, 0));
            assert_eq!(end_time, hm(15, 0));
        }
        other => panic!("unexpected view: {other:?}"),
    }

    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Confirm))).await;
    assert!(matches!(last_view(&h), View::BookingCreated { .. }));
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);

    let mine = h.service.list_user_bookings(UserId(MEMBER)).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(
        mine[0].range.start(),
        Utc.with_ymd_and_hms(2026, 3, 3, 11, 0, 0).unwrap()
    );
    assert_eq!(mine[0].user_name, "user2");
}

#[tokio::test]
async fn back_forgets_the_step_returned_to() {
    let h = harness("back.journal").await;
    let m = walk_to_confirm(&h, MEMBER, day(3), "10:30", 90).await;
    assert_eq!(booking_step(&h, MEMBER), Some(BookingStep::ConfirmingBooking));

    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Back))).await;
    assert!(matches!(last_view(&h), View::AskDuration { .. }));
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Back))).await;
    assert!(matches!(last_view(&h), View::AskStartTime { .. }));
    match h.sessions.get(UserId(MEMBER)) {
        SessionLookup::Found(Session::Booking(w)) => {
            assert_eq!(w.step, BookingStep::ChoosingStartTime);
            assert_eq!(w.data.start_time, None);
            assert_eq!(w.data.duration_minutes, None);
            assert_eq!(w.data.date, Some(day(3)));
        }
        other => panic!("unexpected lookup: {other:?}"),
    }

    // Going forward again lands on the same confirmation.
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Time(hm(10, 30))))).await;
    h.bot
        .handle(press(MEMBER, m, Action::Book(BookAction::Duration(90))))
        .await;
    assert!(matches!(
        last_view(&h),
        View::ConfirmBooking { end_time, .. } if end_time == hm(12, 0)
    ));
}

#[tokio::test]
async fn back_from_room_picker_leaves_wizard() {
    let h = harness("back_exit.journal").await;
    h.bot.handle(text(MEMBER, "/book")).await;
    let m = last_id(&h);
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Back))).await;
    assert!(matches!(last_view(&h), View::MainMenu { is_admin: false }));
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);
}

#[tokio::test]
async fn slot_taken_before_confirm_ends_wizard() {
    let h = harness("slot_taken.journal").await;
    let m = walk_to_confirm(&h, MEMBER, day(3), "14:00", 60).await;

    h.service
        .create_booking(CreateBooking {
            room_id: h.room.id,
            user_id: UserId(ADMIN),
            user_name: "user1".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 3, 11, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 3, 12, 30, 0).unwrap(),
            note: String::new(),
        })
        .await
        .unwrap();

    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Confirm))).await;
    assert_warning(last_view(&h), Warning::SlotTaken);
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);
    assert!(h.service.list_user_bookings(UserId(MEMBER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn end_passing_before_confirm_is_rejected() {
    let h = harness("past_confirm.journal").await;
    // 10:00 in Moscow is 07:00 UTC, an hour from now.
    let m = walk_to_confirm(&h, MEMBER, day(2), "10:00", 30).await;
    assert_eq!(booking_step(&h, MEMBER), Some(BookingStep::ConfirmingBooking));

    *h.clock.lock().unwrap() = Utc.with_ymd_and_hms(2026, 3, 2, 7, 31, 0).unwrap();
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Confirm))).await;
    assert_warning(last_view(&h), Warning::PastTime);
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);
    assert!(h.service.list_user_bookings(UserId(MEMBER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn booking_under_way_still_confirms() {
    let h = harness("started_confirm.journal").await;
    // 10:00-11:00 Moscow, confirmed at 10:15.
    let m = walk_to_confirm(&h, MEMBER, day(2), "10:00", 60).await;
    *h.clock.lock().unwrap() = Utc.with_ymd_and_hms(2026, 3, 2, 7, 15, 0).unwrap();
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Confirm))).await;

    match last_view(&h) {
        View::BookingCreated { booking } => assert_eq!(booking.start, hm(10, 0)),
        other => panic!("unexpected view: {other:?}"),
    }
    assert_eq!(h.service.list_user_bookings(UserId(MEMBER)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn past_start_time_keeps_the_step() {
    let h = harness("past_pick.journal").await;
    h.bot.handle(text(MEMBER, "/book")).await;
    let m = last_id(&h);
    h.bot
        .handle(press(MEMBER, m, Action::Book(BookAction::Room(h.room.id))))
        .await;
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Date(day(2))))).await;
    match last_view(&h) {
        View::AskStartTime { free_slots, .. } => {
            assert_eq!(free_slots.first(), Some(&hm(9, 30)));
        }
        other => panic!("unexpected view: {other:?}"),
    }

    h.bot.handle(text(MEMBER, "8")).await;
    assert_warning(last_view(&h), Warning::PastTime);
    h.bot.handle(text(MEMBER, "14:15")).await;
    assert_warning(last_view(&h), Warning::InvalidInput);
    assert_eq!(booking_step(&h, MEMBER), Some(BookingStep::ChoosingStartTime));
}

#[tokio::test]
async fn discard_drops_the_wizard() {
    let h = harness("discard.journal").await;
    let m = walk_to_confirm(&h, MEMBER, day(3), "9", 30).await;
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Discard))).await;
    assert!(matches!(last_view(&h), View::BookingDiscarded));
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);
}

#[tokio::test]
async fn button_without_wizard_is_stale() {
    let h = harness("stale.journal").await;
    h.bot
        .handle(press(MEMBER, MessageId(99), Action::Book(BookAction::Confirm)))
        .await;
    assert_warning(last_view(&h), Warning::StaleButton);

    h.bot.handle(text(MEMBER, "/book")).await;
    let m = last_id(&h);
    // A step that does not match the wizard is stale too.
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Duration(60)))).await;
    assert_warning(last_view(&h), Warning::StaleButton);
    assert_eq!(booking_step(&h, MEMBER), Some(BookingStep::ChoosingRoom));

    h.bot
        .handle(Update::Callback {
            chat_id: ChatId(MEMBER),
            message_id: m,
            from: sender(MEMBER),
            data: "bk:teleport".into(),
        })
        .await;
    assert_warning(last_view(&h), Warning::StaleButton);
}

#[tokio::test(start_paused = true)]
async fn idle_wizard_times_out() {
    let h = harness("timeout.journal").await;
    h.bot.handle(text(MEMBER, "/book")).await;
    let m = last_id(&h);

    tokio::time::advance(Duration::from_secs(1801)).await;
    h.bot
        .handle(press(MEMBER, m, Action::Book(BookAction::Room(h.room.id))))
        .await;
    assert!(matches!(last_view(&h), View::TimedOut));
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);
}

#[tokio::test]
async fn strangers_are_turned_away() {
    let h = harness("stranger.journal").await;
    h.bot.handle(text(STRANGER, "/book")).await;
    assert!(matches!(last_view(&h), View::Unauthorized));
    assert_eq!(h.sessions.get(UserId(STRANGER)), SessionLookup::NotFound);
}

#[tokio::test]
async fn free_text_without_wizard() {
    let h = harness("free_text.journal").await;
    h.bot.handle(text(MEMBER, "hello")).await;
    assert!(matches!(last_view(&h), View::UnknownCommand));
    h.bot.handle(text(MEMBER, "/start")).await;
    assert!(matches!(last_view(&h), View::MainMenu { is_admin: false }));
    h.bot.handle(text(ADMIN, "/help")).await;
    assert!(matches!(last_view(&h), View::Help { is_admin: true }));
}

#[tokio::test]
async fn room_creation_retries_until_valid() {
    let h = harness("create_room.journal").await;
    h.bot.handle(text(MEMBER, "/create_room")).await;
    assert!(matches!(last_view(&h), View::Unauthorized));

    h.bot.handle(text(ADMIN, "/create_room")).await;
    assert!(matches!(last_view(&h), View::AskRoomName));

    h.bot.handle(text(ADMIN, "x")).await;
    assert_warning(last_view(&h), Warning::InvalidRoomName);
    h.bot.handle(text(ADMIN, "  BLUE ")).await;
    assert_warning(last_view(&h), Warning::RoomExists);
    assert!(matches!(
        h.sessions.get(UserId(ADMIN)),
        SessionLookup::Found(Session::RoomCreation(_))
    ));

    h.bot.handle(text(ADMIN, "Green")).await;
    match last_view(&h) {
        View::RoomCreated { room } => assert_eq!(room.name, "Green"),
        other => panic!("unexpected view: {other:?}"),
    }
    assert_eq!(h.sessions.get(UserId(ADMIN)), SessionLookup::NotFound);
    assert_eq!(h.service.list_rooms().await.unwrap().len(), 2);
}

#[tokio::test]
async fn deactivate_then_activate_room() {
    let h = harness("toggle_room.journal").await;
    let blue = h.room.id;

    h.bot.handle(text(ADMIN, "/deactivate_room")).await;
    assert!(matches!(last_view(&h), View::DeactivatePicker { .. }));
    let m = last_id(&h);
    h.bot
        .handle(press(ADMIN, m, Action::Admin(AdminAction::Deactivate(blue))))
        .await;
    assert!(matches!(last_view(&h), View::ConfirmDeactivate { .. }));
    h.bot
        .handle(press(ADMIN, m, Action::Admin(AdminAction::ConfirmDeactivate(blue))))
        .await;
    assert!(matches!(last_view(&h), View::RoomDeactivated { room } if !room.is_active));

    h.bot.handle(text(MEMBER, "/book")).await;
    assert_warning(last_view(&h), Warning::NoRooms);

    h.bot
        .handle(press(MEMBER, m, Action::Admin(AdminAction::Activate(blue))))
        .await;
    assert!(matches!(last_view(&h), View::Unauthorized));

    h.bot.handle(text(ADMIN, "/activate_room")).await;
    match last_view(&h) {
        View::ActivatePicker { rooms } => assert_eq!(rooms.len(), 1),
        other => panic!("unexpected view: {other:?}"),
    }
    let m = last_id(&h);
    h.bot
        .handle(press(ADMIN, m, Action::Admin(AdminAction::Activate(blue))))
        .await;
    assert!(matches!(last_view(&h), View::RoomActivated { room } if room.is_active));

    h.bot.handle(text(ADMIN, "/activate_room")).await;
    assert_warning(last_view(&h), Warning::NoRooms);
}

#[tokio::test]
async fn cancel_from_my_bookings() {
    let h = harness("my_cancel.journal").await;
    let booking = h
        .service
        .create_booking(CreateBooking {
            room_id: h.room.id,
            user_id: UserId(MEMBER),
            user_name: "user2".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
            note: String::new(),
        })
        .await
        .unwrap();

    h.bot.handle(text(MEMBER, "/my")).await;
    match last_view(&h) {
        View::MyBookings { bookings } => assert_eq!(bookings.len(), 1),
        other => panic!("unexpected view: {other:?}"),
    }
    let m = last_id(&h);

    h.bot
        .handle(press(OTHER_MEMBER, m, Action::My(MyAction::Show(booking.id))))
        .await;
    assert!(matches!(last_view(&h), View::BookingDetails { can_cancel: false, .. }));
    h.bot
        .handle(press(OTHER_MEMBER, m, Action::My(MyAction::Cancel(booking.id))))
        .await;
    assert_warning(last_view(&h), Warning::Forbidden);

    h.bot
        .handle(press(MEMBER, m, Action::My(MyAction::Show(booking.id))))
        .await;
    assert!(matches!(last_view(&h), View::BookingDetails { can_cancel: true, .. }));
    h.bot
        .handle(press(MEMBER, m, Action::My(MyAction::Cancel(booking.id))))
        .await;
    assert!(matches!(last_view(&h), View::BookingCancelled { .. }));

    h.bot
        .handle(press(MEMBER, m, Action::My(MyAction::Cancel(booking.id))))
        .await;
    assert_warning(last_view(&h), Warning::NotFound);
    assert!(h.service.list_user_bookings(UserId(MEMBER)).await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_may_cancel_any_booking() {
    let h = harness("admin_cancel.journal").await;
    let booking = h
        .service
        .create_booking(CreateBooking {
            room_id: h.room.id,
            user_id: UserId(MEMBER),
            user_name: "user2".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
            note: String::new(),
        })
        .await
        .unwrap();
    h.bot
        .handle(press(ADMIN, MessageId(1), Action::My(MyAction::Cancel(booking.id))))
        .await;
    assert!(matches!(last_view(&h), View::BookingCancelled { .. }));
}

#[tokio::test]
async fn week_schedule_lists_every_day() {
    let h = harness("schedule.journal").await;
    h.service
        .create_booking(CreateBooking {
            room_id: h.room.id,
            user_id: UserId(MEMBER),
            user_name: "user2".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 4, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap(),
            note: String::new(),
        })
        .await
        .unwrap();
    h.bot.handle(text(MEMBER, "/schedule")).await;
    match last_view(&h) {
        View::WeekSchedule { days } => {
            assert_eq!(days.len(), 7);
            assert_eq!(days[0].date, day(2));
            assert_eq!(days[2].rooms[0].bookings.len(), 1);
            assert!(days[1].rooms[0].bookings.is_empty());
        }
        other => panic!("unexpected view: {other:?}"),
    }
}

#[tokio::test]
async fn log_wizard_remembers_the_author() {
    let h = harness("log.journal").await;

    h.bot.handle(text(MEMBER, "/log")).await;
    assert!(matches!(last_view(&h), View::AskLogKind));
    let m = last_id(&h);
    h.bot
        .handle(press(MEMBER, m, Action::Log(LogAction::Kind(LogKind::Agreement))))
        .await;
    match last_view(&h) {
        View::LogCalendar { kind, days } => {
            assert_eq!(kind, LogKind::Agreement);
            assert!(days.iter().all(|d| d.enabled == (d.date <= day(2))));
        }
        other => panic!("unexpected view: {other:?}"),
    }
    h.bot.handle(press(MEMBER, m, Action::Log(LogAction::Date(day(3))))).await;
    assert_warning(last_view(&h), Warning::InvalidInput);
    h.bot.handle(press(MEMBER, m, Action::Log(LogAction::Date(day(2))))).await;
    assert!(matches!(last_view(&h), View::AskFullName));

    h.bot.handle(text(MEMBER, "B")).await;
    assert_warning(last_view(&h), Warning::InvalidInput);
    h.bot.handle(text(MEMBER, "Bob Stone")).await;
    assert!(matches!(last_view(&h), View::AskPrincipal));
    h.bot.handle(text(MEMBER, "Acme")).await;
    assert!(matches!(last_view(&h), View::AskComment));
    h.bot.handle(text(MEMBER, "-")).await;
    match last_view(&h) {
        View::ConfirmLogEntry {
            full_name,
            principal,
            comment,
            ..
        } => {
            assert_eq!(full_name, "Bob Stone");
            assert_eq!(principal, "Acme");
            assert_eq!(comment, "");
        }
        other => panic!("unexpected view: {other:?}"),
    }
    let m = last_id(&h);
    h.bot.handle(press(MEMBER, m, Action::Log(LogAction::Confirm))).await;
    match last_view(&h) {
        View::LogEntryCreated { entry } => {
            assert_eq!(entry.number, 1);
            assert_eq!(entry.user_name, "Bob Stone");
        }
        other => panic!("unexpected view: {other:?}"),
    }

    // Second time round the name step is skipped.
    h.bot.handle(text(MEMBER, "/log")).await;
    let m = last_id(&h);
    h.bot
        .handle(press(MEMBER, m, Action::Log(LogAction::Kind(LogKind::Request))))
        .await;
    h.bot.handle(press(MEMBER, m, Action::Log(LogAction::Date(day(2))))).await;
    assert!(matches!(last_view(&h), View::AskPrincipal));

    h.bot.handle(text(MEMBER, "/mylog")).await;
    match last_view(&h) {
        View::MyLogEntries { entries } => assert_eq!(entries.len(), 1),
        other => panic!("unexpected view: {other:?}"),
    }
}

#[tokio::test]
async fn new_wizard_replaces_the_old_one() {
    let h = harness("replace.journal").await;
    h.bot.handle(text(MEMBER, "/book")).await;
    h.bot.handle(text(MEMBER, "/log")).await;
    assert!(matches!(
        h.sessions.get(UserId(MEMBER)),
        SessionLookup::Found(Session::Log(_))
    ));
    h.bot.handle(text(MEMBER, "/cancel")).await;
    assert_eq!(h.sessions.get(UserId(MEMBER)), SessionLookup::NotFound);
}

#[tokio::test]
async fn infrastructure_failure_alerts_operator() {
    let h = harness("infra.journal").await;
    h.bot
        .recover(
            UserId(MEMBER),
            ChatId(MEMBER),
            BotError::Booking(BookingError::Storage(StoreError::Journal("disk full".into()))),
        )
        .await;
    let sent = h.chat.take();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].chat_id(), OPERATOR);
    assert!(matches!(
        &sent[0].reply().view,
        View::OperatorAlert { user_id, summary } if *user_id == UserId(MEMBER) && summary.contains("disk full")
    ));
    assert_eq!(sent[1].chat_id(), ChatId(MEMBER));
    assert_eq!(sent[1].reply().view, View::Apology);
}

#[tokio::test]
async fn group_registration_needs_admin() {
    let h = harness("register.journal").await;
    h.bot.handle(group_text(MEMBER, -500, "/register")).await;
    assert!(h.chat.take().is_empty());
    assert!(h.bot.digest.groups().is_empty());

    h.bot.handle(group_text(ADMIN, -500, "/register@roombot")).await;
    assert_eq!(last_view(&h), View::GroupRegistered);
    assert_eq!(h.bot.digest.groups(), vec![ChatId(-500)]);

    h.bot.handle(group_text(MEMBER, -500, "/schedule")).await;
    assert!(matches!(last_view(&h), View::Digest { .. }));
    h.bot.handle(group_text(MEMBER, -500, "chatter")).await;
    assert!(matches!(last_view(&h), View::Digest { .. }));
}

// ── Digest refresh ───────────────────────────────────────

fn digest_edits(h: &Harness, group: ChatId) -> usize {
    h.chat
        .take()
        .iter()
        .filter(|o| matches!(o, Outgoing::Edited { chat_id, .. } if *chat_id == group))
        .count()
}

#[tokio::test]
async fn digest_wakes_even_when_confirmation_reply_fails() {
    let mut h = harness("digest_on_failed_reply.journal").await;
    let flaky = Arc::new(BrokenPrivateChats {
        inner: h.chat.clone(),
        broken: AtomicBool::new(false),
    });
    h.bot.chat = flaky.clone();
    let group = ChatId(-100);
    h.bot.digest.register_group(group);
    assert_eq!(h.bot.digest.publish().await, 1);

    let m = walk_to_confirm(&h, MEMBER, day(2), "10:00", 30).await;
    h.chat.take();
    flaky.broken.store(true, Ordering::SeqCst);
    h.bot.handle(press(MEMBER, m, Action::Book(BookAction::Confirm))).await;
    assert_eq!(h.service.list_user_bookings(UserId(MEMBER)).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(digest_edits(&h, group), 1);
}

#[tokio::test]
async fn digest_wakes_even_when_cancellation_reply_fails() {
    let mut h = harness("digest_on_failed_cancel.journal").await;
    let flaky = Arc::new(BrokenPrivateChats {
        inner: h.chat.clone(),
        broken: AtomicBool::new(false),
    });
    h.bot.chat = flaky.clone();
    let group = ChatId(-100);
    h.bot.digest.register_group(group);
    h.bot.digest.publish().await;

    let booking = h
        .service
        .create_booking(CreateBooking {
            room_id: h.room.id,
            user_id: UserId(MEMBER),
            user_name: "user2".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            note: String::new(),
        })
        .await
        .unwrap();
    h.chat.take();

    flaky.broken.store(true, Ordering::SeqCst);
    h.bot
        .handle(press(MEMBER, MessageId(1), Action::My(MyAction::Cancel(booking.id))))
        .await;
    assert!(h.service.list_user_bookings(UserId(MEMBER)).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(digest_edits(&h, group), 1);
}

// ── Log lookup and export ────────────────────────────────

async fn seed_entry(h: &Harness, kind: LogKind) {
    h.bot
        .logbook
        .create_entry(CreateLogEntry {
            kind,
            user_id: UserId(MEMBER),
            full_name: "Ann Lee".into(),
            date: day(2),
            principal: "Acme Ltd".into(),
            comment: String::new(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn admin_finds_entry_by_number() {
    let h = harness("logfind.journal").await;
    seed_entry(&h, LogKind::Agreement).await;
    seed_entry(&h, LogKind::Request).await;

    h.bot.handle(text(ADMIN, "/logfind r1")).await;
    match last_view(&h) {
        View::LogEntryFound { entry } => {
            assert_eq!(entry.kind, LogKind::Request);
            assert_eq!(entry.number, 1);
            assert_eq!(entry.user_id, UserId(MEMBER));
        }
        other => panic!("expected the entry, got {other:?}"),
    }

    h.bot.handle(text(ADMIN, "/logfind A7")).await;
    assert_warning(last_view(&h), Warning::NotFound);

    h.bot.handle(text(ADMIN, "/logfind")).await;
    assert_warning(last_view(&h), Warning::InvalidInput);
    h.bot.handle(text(ADMIN, "/logfind Q1")).await;
    assert_warning(last_view(&h), Warning::InvalidInput);
}

#[tokio::test]
async fn log_lookup_and_export_are_admin_only() {
    let h = harness("logfind_member.journal").await;
    seed_entry(&h, LogKind::Agreement).await;

    h.bot.handle(text(MEMBER, "/logfind A1")).await;
    assert!(matches!(last_view(&h), View::Unauthorized));
    h.bot.handle(text(MEMBER, "/logexport")).await;
    assert!(matches!(last_view(&h), View::Unauthorized));
}

#[tokio::test]
async fn export_sends_one_report_per_kind() {
    let h = harness("logexport.journal").await;
    seed_entry(&h, LogKind::Agreement).await;
    seed_entry(&h, LogKind::Agreement).await;
    h.chat.take();

    h.bot.handle(text(ADMIN, "/logexport")).await;
    let reports: Vec<_> = h
        .chat
        .take()
        .into_iter()
        .map(|o| match o.reply().view.clone() {
            View::LogReport { report } => report,
            other => panic!("expected a report, got {other:?}"),
        })
        .collect();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].kind, LogKind::Request);
    assert_eq!(reports[0].rows, 0);
    assert_eq!(reports[1].kind, LogKind::Agreement);
    assert_eq!(reports[1].rows, 2);
    assert!(reports[1].csv.contains("A2,2,Ann Lee,2026-03-02,Acme Ltd,,"));
}
