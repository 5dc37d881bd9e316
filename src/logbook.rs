//! Agreement/request journal kept next to the room bookings.

use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use serde::Serialize;

use crate::limits::{
    MAX_COMMENT_CHARS, MAX_FULL_NAME_CHARS, MAX_PRINCIPAL_CHARS, MIN_FULL_NAME_CHARS,
    REPORT_WINDOW_DAYS,
};
use crate::model::*;
use crate::observability;
use crate::service::Clock;
use crate::store::{LogRepository, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogbookError {
    InvalidFullName,
    InvalidPrincipal,
    CommentTooLong,
    InvalidNumber,
    EntryNotFound(LogKind, u64),
    Export(String),
    Storage(StoreError),
}

impl std::fmt::Display for LogbookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogbookError::InvalidFullName => write!(f, "invalid full name"),
            LogbookError::InvalidPrincipal => write!(f, "invalid principal"),
            LogbookError::CommentTooLong => write!(f, "comment too long"),
            LogbookError::InvalidNumber => write!(f, "invalid entry number"),
            LogbookError::EntryNotFound(kind, n) => {
                write!(f, "{} entry {}{} not found", kind.as_str(), kind.code(), n)
            }
            LogbookError::Export(e) => write!(f, "report export failed: {e}"),
            LogbookError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for LogbookError {}

impl From<StoreError> for LogbookError {
    fn from(e: StoreError) -> Self {
        LogbookError::Storage(e)
    }
}

impl From<csv::Error> for LogbookError {
    fn from(e: csv::Error) -> Self {
        LogbookError::Export(e.to_string())
    }
}

/// One CSV table of entries of a single kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogReport {
    pub kind: LogKind,
    pub file_name: String,
    pub rows: usize,
    pub csv: String,
}

const REPORT_HEADER: [&str; 7] = [
    "Number",
    "User ID",
    "User name",
    "Date",
    "Principal",
    "Comment",
    "Created at",
];

#[derive(Serialize)]
struct ReportRow<'a> {
    number: String,
    user_id: i64,
    user_name: &'a str,
    date: String,
    principal: &'a str,
    comment: &'a str,
    created_at: String,
}

fn write_report(entries: &[&LogEntry]) -> Result<String, LogbookError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(REPORT_HEADER)?;
    for e in entries {
        wtr.serialize(ReportRow {
            number: e.label(),
            user_id: e.user_id.0,
            user_name: &e.user_name,
            date: e.date.format("%Y-%m-%d").to_string(),
            principal: &e.principal,
            comment: &e.comment,
            created_at: e.created_at.to_rfc3339(),
        })?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| LogbookError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| LogbookError::Export(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct CreateLogEntry {
    pub kind: LogKind,
    pub user_id: UserId,
    pub full_name: String,
    pub date: NaiveDate,
    pub principal: String,
    pub comment: String,
}

pub fn validate_full_name(name: &str) -> Result<&str, LogbookError> {
    let name = name.trim();
    let chars = name.chars().count();
    if !(MIN_FULL_NAME_CHARS..=MAX_FULL_NAME_CHARS).contains(&chars) {
        return Err(LogbookError::InvalidFullName);
    }
    Ok(name)
}

pub fn validate_principal(principal: &str) -> Result<&str, LogbookError> {
    let principal = principal.trim();
    if principal.is_empty() || principal.chars().count() > MAX_PRINCIPAL_CHARS {
        return Err(LogbookError::InvalidPrincipal);
    }
    Ok(principal)
}

pub fn validate_comment(comment: &str) -> Result<&str, LogbookError> {
    let comment = comment.trim();
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(LogbookError::CommentTooLong);
    }
    Ok(comment)
}

pub struct LogService {
    repo: Arc<dyn LogRepository>,
    clock: Clock,
}

impl LogService {
    pub fn new(repo: Arc<dyn LogRepository>, clock: Clock) -> Self {
        Self { repo, clock }
    }

    /// Saved full name, if the user has written an entry before.
    pub async fn profile(&self, user_id: UserId) -> Result<Option<String>, LogbookError> {
        Ok(self.repo.get_profile(user_id).await?)
    }

    /// Validates, remembers the author's full name and appends a numbered
    /// entry.
    pub async fn create_entry(&self, cmd: CreateLogEntry) -> Result<LogEntry, LogbookError> {
        let full_name = validate_full_name(&cmd.full_name)?;
        let principal = validate_principal(&cmd.principal)?;
        let comment = validate_comment(&cmd.comment)?;

        self.repo.save_profile(cmd.user_id, full_name).await?;
        let entry = self
            .repo
            .create_entry(NewLogEntry {
                kind: cmd.kind,
                user_id: cmd.user_id,
                user_name: full_name.to_string(),
                date: cmd.date,
                principal: principal.to_string(),
                comment: comment.to_string(),
                created_at: (self.clock)(),
            })
            .await?;
        metrics::counter!(observability::LOG_ENTRIES_TOTAL, "kind" => cmd.kind.as_str())
            .increment(1);
        tracing::info!(
            "log entry {} #{} by user {}",
            entry.kind.as_str(),
            entry.number,
            entry.user_id
        );
        Ok(entry)
    }

    pub async fn list_user_entries(&self, user_id: UserId) -> Result<Vec<LogEntry>, LogbookError> {
        Ok(self.repo.list_entries_by_user(user_id).await?)
    }

    pub async fn find_entry(&self, kind: LogKind, number: u64) -> Result<LogEntry, LogbookError> {
        if number == 0 {
            return Err(LogbookError::InvalidNumber);
        }
        self.repo
            .get_entry(kind, number)
            .await?
            .ok_or(LogbookError::EntryNotFound(kind, number))
    }

    /// One CSV per kind covering the trailing report window, requests first.
    pub async fn export_reports(&self) -> Result<Vec<LogReport>, LogbookError> {
        let now = (self.clock)();
        let from = now - TimeDelta::days(REPORT_WINDOW_DAYS);
        let entries = self.repo.list_entries_since(from).await?;
        let stamp = now.format("%Y%m%d");

        let mut reports = Vec::with_capacity(2);
        for kind in [LogKind::Request, LogKind::Agreement] {
            let rows: Vec<&LogEntry> = entries.iter().filter(|e| e.kind == kind).collect();
            reports.push(LogReport {
                kind,
                file_name: format!("{}s_{stamp}.csv", kind.as_str()),
                rows: rows.len(),
                csv: write_report(&rows)?,
            });
        }
        tracing::info!("log reports exported: {} entries since {}", entries.len(), from);
        Ok(reports)
    }
}
