use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::chat::ChatPort;
use crate::error::BookingError;
use crate::model::{ChatId, MessageId};
use crate::observability;
use crate::service::BookingService;
use crate::view::{DaySchedule, Reply, View};

/// First instant of `date` in `tz`, as UTC.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// End of the office-local day containing `now`.
pub fn end_of_local_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    today
        .succ_opt()
        .and_then(|tomorrow| local_midnight(tomorrow, tz))
        .unwrap_or(now + TimeDelta::days(1))
}

/// Keeps one live "today" message per group and edits it as bookings change.
pub struct ScheduleDigest {
    chat: Arc<dyn ChatPort>,
    service: Arc<BookingService>,
    tz: Tz,
    /// The lock also orders publish against wake for the group.
    groups: DashMap<ChatId, Arc<Mutex<Option<MessageId>>>>,
}

impl ScheduleDigest {
    pub fn new(chat: Arc<dyn ChatPort>, service: Arc<BookingService>, tz: Tz) -> Self {
        Self {
            chat,
            service,
            tz,
            groups: DashMap::new(),
        }
    }

    /// Returns `false` when the group was already registered.
    pub fn register_group(&self, chat_id: ChatId) -> bool {
        let mut inserted = false;
        self.groups.entry(chat_id).or_insert_with(|| {
            inserted = true;
            Arc::new(Mutex::new(None))
        });
        if inserted {
            tracing::info!("digest group {chat_id} registered");
        }
        inserted
    }

    pub fn groups(&self) -> Vec<ChatId> {
        let mut ids: Vec<_> = self.groups.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub async fn render(&self) -> Result<Reply, BookingError> {
        let now = self.service.now();
        let today = now.with_timezone(&self.tz).date_naive();
        let rooms = self
            .service
            .day_schedule(end_of_local_day(now, self.tz))
            .await?;
        Ok(Reply::new(View::Digest {
            schedule: DaySchedule::new(today, &rooms, self.tz),
        }))
    }

    fn slots(&self) -> Vec<(ChatId, Arc<Mutex<Option<MessageId>>>)> {
        self.groups
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Sends a fresh digest to every group and remembers the new message.
    /// Returns how many groups got one.
    pub async fn publish(&self) -> usize {
        let reply = match self.render().await {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!(observability::DIGEST_FAILURES_TOTAL).increment(1);
                tracing::error!("digest render failed: {e}");
                return 0;
            }
        };
        let mut published = 0;
        for (chat_id, slot) in self.slots() {
            let mut current = slot.lock().await;
            match self.chat.send(chat_id, &reply).await {
                Ok(message_id) => {
                    *current = Some(message_id);
                    published += 1;
                }
                Err(e) => {
                    metrics::counter!(observability::DIGEST_FAILURES_TOTAL).increment(1);
                    tracing::error!("digest publish to {chat_id} failed: {e}");
                }
            }
        }
        published
    }

    /// Re-renders the live message of every group in place. Groups with
    /// nothing published yet are left alone.
    pub async fn wake(&self) -> usize {
        let mut edited = 0;
        for (chat_id, slot) in self.slots() {
            let current = slot.lock().await;
            let Some(message_id) = *current else { continue };
            // Render under the lock so a later wake never loses to an earlier one.
            let reply = match self.render().await {
                Ok(r) => r,
                Err(e) => {
                    metrics::counter!(observability::DIGEST_FAILURES_TOTAL).increment(1);
                    tracing::error!("digest render failed: {e}");
                    return edited;
                }
            };
            match self.chat.edit(chat_id, message_id, &reply).await {
                Ok(()) => edited += 1,
                Err(e) => {
                    metrics::counter!(observability::DIGEST_FAILURES_TOTAL).increment(1);
                    tracing::warn!("digest edit in {chat_id} failed: {e}");
                }
            }
        }
        edited
    }

    /// Fire-and-forget [`wake`](Self::wake).
    pub fn wake_detached(self: &Arc<Self>) {
        let digest = self.clone();
        tokio::spawn(async move {
            digest.wake().await;
        });
    }
}
