use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Callback the replay layers use to report state transitions. Payloads are
/// JSON objects; callees merge in their own identifying fields.
pub type ProgressSink = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// A sink that discards everything; useful for tests and library callers.
pub fn null_sink() -> ProgressSink {
    Arc::new(|_event, _payload| {})
}

/// Invoke a progress sink without letting a misbehaving callback disturb
/// the replay.
pub fn emit(sink: &ProgressSink, event: &str, payload: Value) {
    let _ = catch_unwind(AssertUnwindSafe(|| sink(event, payload)));
}

/// Current UTC time in RFC3339 with a `Z` suffix, as stamped on progress
/// rows and manifests.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Thread-safe append-only JSONL progress log.
///
/// Every write opens, appends one line, and closes under the lock, so a
/// crashed run loses at most the line being written. Write failures are
/// swallowed: progress reporting must never take the run down.
pub struct ProgressLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProgressLogger {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn log(&self, event: &str, payload: Value) {
        let mut row = Map::new();
        row.insert("ts".to_string(), Value::String(utc_timestamp()));
        row.insert("event".to_string(), Value::String(event.to_string()));
        if let Value::Object(fields) = payload {
            for (key, value) in fields {
                row.insert(key, value);
            }
        }

        let Ok(line) = serde_json::to_string(&Value::Object(row)) else {
            return;
        };
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{}", line);
        }
    }

    /// Sink that forwards events to this log.
    pub fn sink(self: &Arc<Self>) -> ProgressSink {
        let logger = Arc::clone(self);
        Arc::new(move |event, payload| logger.log(event, payload))
    }
}
