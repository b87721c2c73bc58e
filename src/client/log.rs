// Event Log Module
// Bounded in-memory history of what happened to the consumer's streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Entries kept before the oldest are evicted
pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    Event,
    StateChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Sse,
    Network,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub category: LogCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(
        &mut self,
        kind: LogKind,
        category: LogCategory,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            category,
            message: message.into(),
            details,
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_oldest_entries_evicted() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.record(
                LogKind::Event,
                LogCategory::Sse,
                format!("event {i}"),
                serde_json::Value::Null,
            );
        }

        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_entry_serialization() {
        let mut log = EventLog::default();
        log.record(
            LogKind::StateChange,
            LogCategory::Network,
            "network changed",
            json!({"status": "offline"}),
        );

        let json = serde_json::to_string(&log.entries()[0]).unwrap();
        assert!(json.contains("\"kind\":\"state-change\""));
        assert!(json.contains("\"category\":\"network\""));
        assert!(json.contains("\"status\":\"offline\""));
    }

    #[test]
    fn test_clear() {
        let mut log = EventLog::default();
        log.record(LogKind::Event, LogCategory::System, "x", serde_json::Value::Null);
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}
