//! Bounded per-agent log buffer
//!
//! Every line is mirrored to `tracing` with the agent id attached, and kept
//! in a ring buffer so callers can fetch an agent's recent history.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use crate::error::FleetError;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl FromStr for LogLevel {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(FleetError::invalid_config(format!("unknown log level '{other}'"))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug)]
pub struct AgentLogBuffer {
    agent_id: String,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl AgentLogBuffer {
    pub fn new(agent_id: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            agent_id: agent_id.to_string(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let agent_id = self.agent_id.as_str();
        match level {
            LogLevel::Debug => debug!(%agent_id, "{}", message),
            LogLevel::Info => info!(%agent_id, "{}", message),
            LogLevel::Warning => warn!(%agent_id, "{}", message),
            LogLevel::Error => error!(%agent_id, "{}", message),
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message);
    }

    /// Most recent `limit` entries (oldest first), optionally only one level
    pub fn recent(&self, limit: usize, level: Option<LogLevel>) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let mut selected: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|e| level.map_or(true, |l| e.level == l))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
