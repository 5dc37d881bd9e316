use chrono::NaiveDate;

use crate::model::LogKind;

use super::{Draft, WizardStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStep {
    ChoosingKind,
    ChoosingDate,
    EnteringFullName,
    EnteringPrincipal,
    EnteringComment,
    Confirming,
}

impl WizardStep for LogStep {
    fn previous(self) -> Option<Self> {
        match self {
            LogStep::ChoosingKind => None,
            LogStep::ChoosingDate => Some(LogStep::ChoosingKind),
            LogStep::EnteringFullName => Some(LogStep::ChoosingDate),
            LogStep::EnteringPrincipal => Some(LogStep::EnteringFullName),
            LogStep::EnteringComment => Some(LogStep::EnteringPrincipal),
            LogStep::Confirming => Some(LogStep::EnteringComment),
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            LogStep::ChoosingKind => Some(LogStep::ChoosingDate),
            LogStep::ChoosingDate => Some(LogStep::EnteringFullName),
            LogStep::EnteringFullName => Some(LogStep::EnteringPrincipal),
            LogStep::EnteringPrincipal => Some(LogStep::EnteringComment),
            LogStep::EnteringComment => Some(LogStep::Confirming),
            LogStep::Confirming => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDraft {
    /// Full name remembered from an earlier entry. Survives going back.
    pub known_name: Option<String>,
    pub kind: Option<LogKind>,
    pub week_shift: i64,
    pub date: Option<NaiveDate>,
    pub full_name: Option<String>,
    pub principal: Option<String>,
    pub comment: Option<String>,
}

impl LogDraft {
    pub fn with_known_name(known_name: Option<String>) -> Self {
        Self {
            known_name,
            ..Default::default()
        }
    }

    /// Name to sign the entry with.
    pub fn author(&self) -> Option<&str> {
        self.full_name.as_deref().or(self.known_name.as_deref())
    }
}

impl Draft<LogStep> for LogDraft {
    fn clear_from(&mut self, step: LogStep) {
        if step == LogStep::ChoosingKind {
            self.kind = None;
            self.week_shift = 0;
        }
        if matches!(step, LogStep::ChoosingKind | LogStep::ChoosingDate) {
            self.date = None;
        }
        if matches!(
            step,
            LogStep::ChoosingKind | LogStep::ChoosingDate | LogStep::EnteringFullName
        ) {
            self.full_name = None;
        }
        if step != LogStep::EnteringComment && step != LogStep::Confirming {
            self.principal = None;
        }
        if step != LogStep::Confirming {
            self.comment = None;
        }
    }

    fn skips(&self, step: LogStep) -> bool {
        step == LogStep::EnteringFullName && self.known_name.is_some()
    }
}
