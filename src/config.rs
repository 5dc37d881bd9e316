use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::model::ChatId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Organization chat: decides roles and receives the daily digest.
    pub group_chat_id: Option<ChatId>,
    /// Where infrastructure failures are reported.
    pub operator_chat_id: Option<ChatId>,
    pub office_tz: Tz,
    pub role_cache_ttl: Duration,
    pub session_idle: Duration,
    pub digest_at: NaiveTime,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub max_connections: usize,
    pub update_timeout: Duration,
    pub gateway_timeout: Duration,
    pub overlap_precheck: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 7070,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            group_chat_id: None,
            operator_chat_id: None,
            office_tz: chrono_tz::Europe::Moscow,
            role_cache_ttl: Duration::from_secs(300),
            session_idle: Duration::from_secs(30 * 60),
            digest_at: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
            retention: Duration::from_secs(30 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            compact_threshold: 1000,
            max_connections: 4,
            update_timeout: Duration::from_secs(30),
            gateway_timeout: Duration::from_secs(10),
            overlap_precheck: true,
        }
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parsed::<u64>(get, var)?.map(Duration::from_secs))
}

impl Config {
    /// Reads `ROOMBOOK_*` variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        let digest_at = match get("ROOMBOOK_DIGEST_AT") {
            None => d.digest_at,
            Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
                ConfigError::Invalid {
                    var: "ROOMBOOK_DIGEST_AT",
                    value: raw,
                }
            })?,
        };
        let office_tz = match get("ROOMBOOK_OFFICE_TZ") {
            None => d.office_tz,
            Some(raw) => raw.trim().parse::<Tz>().map_err(|_| ConfigError::Invalid {
                var: "ROOMBOOK_OFFICE_TZ",
                value: raw,
            })?,
        };
        let retention = parsed::<u64>(&get, "ROOMBOOK_RETENTION_DAYS")?
            .map(|days| Duration::from_secs(days * 24 * 3600))
            .unwrap_or(d.retention);

        Ok(Self {
            bind: get("ROOMBOOK_BIND").unwrap_or(d.bind),
            port: parsed(&get, "ROOMBOOK_PORT")?.unwrap_or(d.port),
            data_dir: get("ROOMBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port: parsed(&get, "ROOMBOOK_METRICS_PORT")?,
            group_chat_id: parsed(&get, "ROOMBOOK_GROUP_CHAT_ID")?.map(ChatId),
            operator_chat_id: parsed(&get, "ROOMBOOK_OPERATOR_CHAT_ID")?.map(ChatId),
            office_tz,
            role_cache_ttl: secs(&get, "ROOMBOOK_ROLE_CACHE_TTL_SECS")?.unwrap_or(d.role_cache_ttl),
            session_idle: secs(&get, "ROOMBOOK_SESSION_IDLE_SECS")?.unwrap_or(d.session_idle),
            digest_at,
            retention,
            sweep_interval: secs(&get, "ROOMBOOK_SWEEP_INTERVAL_SECS")?.unwrap_or(d.sweep_interval),
            compact_threshold: parsed(&get, "ROOMBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            max_connections: parsed(&get, "ROOMBOOK_MAX_CONNECTIONS")?.unwrap_or(d.max_connections),
            update_timeout: secs(&get, "ROOMBOOK_UPDATE_TIMEOUT_SECS")?.unwrap_or(d.update_timeout),
            gateway_timeout: secs(&get, "ROOMBOOK_GATEWAY_TIMEOUT_SECS")?
                .unwrap_or(d.gateway_timeout),
            overlap_precheck: parsed(&get, "ROOMBOOK_OVERLAP_PRECHECK")?
                .unwrap_or(d.overlap_precheck),
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.journal")
    }
}
