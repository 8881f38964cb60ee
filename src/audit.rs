use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Debug => write!(f, "debug"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Append-only, capacity-bounded audit trail shared by every pipeline run.
///
/// Cloning yields another handle onto the same buffer. Once the buffer is
/// full the oldest entry is dropped for each new one. No method returns an
/// error or panics.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
    capture_debug: bool,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl AuditLogger {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries.min(4096)))),
            max_entries,
            capture_debug: false,
        }
    }

    /// Also store `debug`-level entries (dropped by default).
    pub fn with_debug(mut self, capture_debug: bool) -> Self {
        self.capture_debug = capture_debug;
        self
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        // A panic elsewhere while holding the lock must not take logging down.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn log(
        &self,
        request_id: &str,
        level: LogLevel,
        component: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) {
        if level == LogLevel::Debug && !self.capture_debug {
            return;
        }

        let entry = LogEntry {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.to_string(),
            metadata,
        };
        mirror(&entry);

        let mut buf = self.buffer();
        while buf.len() >= self.max_entries {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    pub fn info(&self, request_id: &str, component: &str, message: &str) {
        self.log(request_id, LogLevel::Info, component, message, None);
    }

    pub fn warn(&self, request_id: &str, component: &str, message: &str) {
        self.log(request_id, LogLevel::Warn, component, message, None);
    }

    pub fn error(&self, request_id: &str, component: &str, message: &str) {
        self.log(request_id, LogLevel::Error, component, message, None);
    }

    pub fn debug(&self, request_id: &str, component: &str, message: &str) {
        self.log(request_id, LogLevel::Debug, component, message, None);
    }

    /// Record a stage snapshot: its input, output and how long it took.
    ///
    /// Payloads that fail to serialize are dropped; the entry is still written.
    pub fn log_stage<I, O>(
        &self,
        request_id: &str,
        stage: &str,
        input: &I,
        output: Option<&O>,
        duration: Duration,
    ) where
        I: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        let input = serde_json::to_value(input).ok();
        let output = output.and_then(|o| serde_json::to_value(o).ok());
        let metadata = serde_json::json!({
            "input": input,
            "output": output,
            "durationMs": duration.as_millis() as u64,
        });
        self.log(request_id, LogLevel::Info, stage, stage, Some(metadata));
    }

    /// The most recent `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let buf = self.buffer();
        let skip = buf.len().saturating_sub(count);
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn for_request(&self, request_id: &str) -> Vec<LogEntry> {
        self.buffer()
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    /// `error`-level entries of one request.
    pub fn errors_for_request(&self, request_id: &str) -> Vec<LogEntry> {
        self.buffer()
            .iter()
            .filter(|e| e.request_id == request_id && e.level == LogLevel::Error)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }
}

fn mirror(entry: &LogEntry) {
    let request_id = entry.request_id.as_str();
    let component = entry.component.as_str();
    match entry.level {
        LogLevel::Error => error!(request_id, component, "{}", entry.message),
        LogLevel::Warn => warn!(request_id, component, "{}", entry.message),
        LogLevel::Info => info!(request_id, component, "{}", entry.message),
        LogLevel::Debug => debug!(request_id, component, "{}", entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_drops_oldest_first() {
        let logger = AuditLogger::new(10);
        for i in 0..15 {
            logger.info("r1", "TEST", &format!("entry {i}"));
        }
        let recent = logger.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].message, "entry 5");
        assert_eq!(recent[9].message, "entry 14");
        assert!(!recent.iter().any(|e| e.message == "entry 4"));
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let logger = AuditLogger::new(100);
        for i in 0..5 {
            logger.info("r1", "TEST", &format!("m{i}"));
        }
        let msgs: Vec<_> = logger.recent(2).into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["m3", "m4"]);
        assert_eq!(logger.recent(50).len(), 5);
        assert!(logger.recent(0).is_empty());
    }

    #[test]
    fn test_for_request_filters_interleaved_entries() {
        let logger = AuditLogger::new(100);
        logger.info("a", "X", "a1");
        logger.info("b", "X", "b1");
        logger.error("a", "X", "a2");
        let a = logger.for_request("a");
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|e| e.request_id == "a"));
        assert!(logger.for_request("missing").is_empty());
    }

    #[test]
    fn test_errors_for_request_only_errors() {
        let logger = AuditLogger::new(100);
        logger.info("a", "CODE_GEN", "started");
        logger.warn("a", "CODE_GEN", "slow");
        logger.error("a", "CODE_GEN", "boom");
        logger.error("b", "CODE_GEN", "other");
        let errors = logger.errors_for_request("a");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");
        assert_eq!(errors[0].level, LogLevel::Error);
    }

    #[test]
    fn test_debug_entries_dropped_unless_enabled() {
        let logger = AuditLogger::new(10);
        logger.debug("r", "X", "hidden");
        assert!(logger.is_empty());

        let logger = AuditLogger::new(10).with_debug(true);
        logger.debug("r", "X", "kept");
        assert_eq!(logger.len(), 1);
        assert_eq!(logger.recent(1)[0].level, LogLevel::Debug);
    }

    #[test]
    fn test_log_stage_metadata_shape() {
        let logger = AuditLogger::new(10);
        logger.log_stage(
            "r",
            "CODE_GEN_COMPLETE",
            "prompt text",
            Some(&serde_json::json!({"code": "x"})),
            Duration::from_millis(42),
        );
        let entry = &logger.recent(1)[0];
        assert_eq!(entry.component, "CODE_GEN_COMPLETE");
        let meta = entry.metadata.as_ref().unwrap();
        assert_eq!(meta["input"], "prompt text");
        assert_eq!(meta["output"]["code"], "x");
        assert_eq!(meta["durationMs"], 42);
    }

    #[test]
    fn test_log_stage_swallows_unserializable_payload() {
        use std::collections::HashMap;
        // Non-string map keys cannot become JSON object keys.
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        let logger = AuditLogger::new(10);
        logger.log_stage("r", "STAGE", &bad, None::<&str>, Duration::ZERO);
        let entry = &logger.recent(1)[0];
        assert!(entry.metadata.as_ref().unwrap()["input"].is_null());
    }

    #[test]
    fn test_clones_share_buffer() {
        let logger = AuditLogger::new(10);
        let other = logger.clone();
        other.info("r", "X", "from clone");
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let logger = AuditLogger::new(0);
        logger.info("r", "X", "one");
        logger.info("r", "X", "two");
        assert_eq!(logger.capacity(), 1);
        assert_eq!(logger.recent(5)[0].message, "two");
    }

    #[test]
    fn test_concurrent_appends_are_all_recorded() {
        let logger = AuditLogger::new(10_000);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        logger.info(&format!("req-{t}"), "X", &format!("{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(logger.len(), 800);
        assert_eq!(logger.for_request("req-3").len(), 100);
    }
}
