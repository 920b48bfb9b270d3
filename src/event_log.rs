use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Info,
    Tx,
    Rx,
    Warn,
    Err,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            LogCategory::Info => "info",
            LogCategory::Tx => "tx",
            LogCategory::Rx => "rx",
            LogCategory::Warn => "warn",
            LogCategory::Err => "err",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub category: LogCategory,
}

/// User-visible diagnostics. A bounded buffer, the oldest entries are dropped first.
/// Every entry is mirrored to the `log` facade.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        EventLog {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, category: LogCategory, message: impl Into<String>) {
        let message = message.into();

        match category {
            LogCategory::Info => info!("{}", message),
            LogCategory::Tx | LogCategory::Rx => debug!("[{}] {}", category, message),
            LogCategory::Warn => warn!("{}", message),
            LogCategory::Err => error!("{}", message),
        }

        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry { message, category });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogCategory::Info, message);
    }

    pub fn tx(&self, message: impl Into<String>) {
        self.push(LogCategory::Tx, message);
    }

    pub fn rx(&self, message: impl Into<String>) {
        self.push(LogCategory::Rx, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogCategory::Warn, message);
    }

    pub fn err(&self, message: impl Into<String>) {
        self.push(LogCategory::Err, message);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_and_categories() {
        let log = EventLog::new(10);
        log.info("scanning");
        log.tx("01 00 00");
        log.err("link lost");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], LogEntry { message: "scanning".into(), category: LogCategory::Info });
        assert_eq!(entries[1].category, LogCategory::Tx);
        assert_eq!(entries[2].category, LogCategory::Err);
    }

    #[test]
    fn drops_oldest_when_full() {
        let log = EventLog::new(2);
        log.info("a");
        log.info("b");
        log.info("c");

        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn clear_empties_shared_buffer() {
        let log = EventLog::new(4);
        let clone = log.clone();
        log.warn("x");
        clone.clear();
        assert!(log.entries().is_empty());
    }
}
