use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::auth::RoleCache;
use crate::bot::Bot;
use crate::config::Config;
use crate::digest::ScheduleDigest;
use crate::dispatch::Dispatcher;
use crate::gateway::Gateway;
use crate::logbook::LogService;
use crate::reaper;
use crate::service::{BookingService, Clock};
use crate::session::SessionStore;
use crate::store::JournalStore;

/// How long a user's lane outlives their last update.
const LANE_IDLE: Duration = Duration::from_secs(300);

/// Everything one running bot needs, wired together.
pub struct App {
    pub config: Config,
    pub clock: Clock,
    pub store: Arc<JournalStore>,
    pub service: Arc<BookingService>,
    pub sessions: Arc<SessionStore>,
    pub digest: Arc<ScheduleDigest>,
    pub gateway: Arc<Gateway>,
    pub dispatcher: Arc<Dispatcher<Bot>>,
}

impl App {
    /// Replays the journal under `config.data_dir` and builds the services on
    /// top of it. Must run inside a tokio runtime.
    pub fn open(config: Config, clock: Clock) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(JournalStore::open(config.journal_path())?);
        tracing::info!(
            "journal replayed: {} rooms, {} bookings",
            store.room_count(),
            store.booking_count()
        );

        let service = Arc::new(BookingService::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            config.overlap_precheck,
        ));
        let logbook = Arc::new(LogService::new(store.clone(), clock.clone()));
        let sessions = Arc::new(SessionStore::new(config.session_idle));
        let gateway = Arc::new(Gateway::new(config.gateway_timeout));
        let roles = Arc::new(RoleCache::new(
            gateway.clone(),
            config.group_chat_id,
            config.role_cache_ttl,
        ));
        let digest = Arc::new(ScheduleDigest::new(
            gateway.clone(),
            service.clone(),
            config.office_tz,
        ));
        if let Some(group) = config.group_chat_id {
            digest.register_group(group);
        }

        let bot = Arc::new(Bot {
            chat: gateway.clone(),
            service: service.clone(),
            logbook,
            sessions: sessions.clone(),
            roles,
            digest: digest.clone(),
            tz: config.office_tz,
            operator_chat: config.operator_chat_id,
        });
        let dispatcher = Arc::new(Dispatcher::new(bot, config.update_timeout, LANE_IDLE));

        Ok(Self {
            config,
            clock,
            store,
            service,
            sessions,
            digest,
            gateway,
            dispatcher,
        })
    }

    /// Starts the background jobs.
    pub fn spawn_jobs(&self) -> Vec<JoinHandle<()>> {
        let cfg = &self.config;
        vec![
            tokio::spawn(reaper::run_sweeper(
                self.service.clone(),
                self.sessions.clone(),
                cfg.retention,
                cfg.sweep_interval,
            )),
            tokio::spawn(reaper::run_compactor(
                self.store.clone(),
                cfg.compact_threshold,
            )),
            tokio::spawn(reaper::run_daily_digest(
                self.digest.clone(),
                self.clock.clone(),
                cfg.office_tz,
                cfg.digest_at,
            )),
        ]
    }
}
