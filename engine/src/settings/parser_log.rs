use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingParserLogEntry {
    pub severity: Severity,
    /// Pipeline or command the entry refers to.
    pub command: String,
    pub message: String,
}

impl fmt::Display for SettingParserLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.command, self.message)
    }
}

/// Findings of a semantic settings check.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct SettingParserLog {
    entries: Vec<SettingParserLogEntry>,
}

impl SettingParserLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        severity: Severity,
        command: impl Into<String>,
        message: impl Into<String>,
    ) {
        let entry = SettingParserLogEntry {
            severity,
            command: command.into(),
            message: message.into(),
        };
        match severity {
            Severity::Info => info!("{entry}"),
            Severity::Warning => warn!("{entry}"),
            Severity::Error => error!("{entry}"),
        }
        self.entries.push(entry);
    }

    pub fn info(&mut self, command: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, command, message);
    }

    pub fn warning(&mut self, command: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, command, message);
    }

    pub fn error(&mut self, command: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, command, message);
    }

    pub fn entries(&self) -> &[SettingParserLogEntry] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &SettingParserLogEntry> {
        self.entries.iter().filter(|e| e.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn extend(&mut self, other: SettingParserLog) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
