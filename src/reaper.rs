use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::digest::ScheduleDigest;
use crate::service::{BookingService, Clock};
use crate::session::SessionStore;
use crate::store::JournalStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Drops bookings that ended more than `retention` ago and wizards idle past
/// their limit. Returns the number of bookings removed.
pub async fn sweep_once(
    service: &BookingService,
    sessions: &SessionStore,
    retention: Duration,
) -> usize {
    let evicted = sessions.evict_idle();
    if evicted > 0 {
        tracing::debug!("evicted {evicted} idle sessions");
    }
    let Some(cutoff) = TimeDelta::from_std(retention)
        .ok()
        .and_then(|r| service.now().checked_sub_signed(r))
    else {
        return 0;
    };
    match service.sweep(cutoff).await {
        Ok(removed) => removed,
        Err(e) => {
            tracing::error!("booking sweep failed: {e}");
            0
        }
    }
}

/// Background task running [`sweep_once`] every `every`.
pub async fn run_sweeper(
    service: Arc<BookingService>,
    sessions: Arc<SessionStore>,
    retention: Duration,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&service, &sessions, retention).await;
    }
}

/// Compacts the journal once `threshold` appends piled up since the last
/// snapshot.
pub async fn compact_if_due(store: &JournalStore, threshold: u64) -> bool {
    let appended = store.appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted journal after {appended} appends");
            true
        }
        Err(e) => {
            tracing::error!("journal compaction failed: {e}");
            false
        }
    }
}

pub async fn run_compactor(store: Arc<JournalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Next instant strictly after `now` whose office-local time is `at`.
pub fn next_digest_at(now: DateTime<Utc>, tz: Tz, at: NaiveTime) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    [Some(today), today.succ_opt()]
        .into_iter()
        .flatten()
        .filter_map(|day| tz.from_local_datetime(&day.and_time(at)).earliest())
        .map(|t| t.with_timezone(&Utc))
        .find(|t| *t > now)
        .unwrap_or(now + TimeDelta::days(1))
}

/// Publishes the schedule digest to every registered group once a day.
pub async fn run_daily_digest(digest: Arc<ScheduleDigest>, clock: Clock, tz: Tz, at: NaiveTime) {
    loop {
        let now = clock();
        let next = next_digest_at(now, tz, at);
        info!("next schedule digest at {next}");
        tokio::time::sleep((next - now).to_std().unwrap_or(Duration::ZERO)).await;
        let published = digest.publish().await;
        info!("schedule digest published to {published} groups");
    }
}
