use crate::errors::CassetteError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const RUN_LOG_ENV: &str = "CASSETTE_CHECK_LOG";

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    /// Byte budget for the log's directory. `None` never prunes; only set it
    /// when the directory belongs to this tool.
    pub budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts: u64,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: None,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), CassetteError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CassetteError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            ts: event.ts,
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| CassetteError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CassetteError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| CassetteError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| CassetteError::Io(e.to_string()))?;

        if let (Some(parent), Some(budget)) = (self.path.parent(), self.budget_bytes) {
            let _ = enforce_total_budget(parent, budget, &self.path)?;
        }

        Ok(())
    }
}

fn run_logger() -> &'static Mutex<Option<JsonlLogger>> {
    static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Routes `append_run_log` to `path` for the rest of the process. Pass a
/// budget only for the tool's own log directory.
pub fn init_run_log(path: impl AsRef<Path>, budget_bytes: Option<u64>) {
    let mut logger = JsonlLogger::new(path);
    logger.budget_bytes = budget_bytes;
    if let Ok(mut slot) = run_logger().lock() {
        *slot = Some(logger);
    }
}

pub fn run_log_path() -> Option<PathBuf> {
    run_logger()
        .lock()
        .ok()
        .and_then(|slot| slot.as_ref().map(|logger| logger.path.clone()))
}

/// Appends one event to the run log. Logging never fails the pipeline, and
/// nothing is written before `init_run_log`.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Ok(slot) = run_logger().lock() else {
        return;
    };
    let Some(logger) = slot.as_ref() else {
        return;
    };
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    if let Err(error) = logger.append(&LogEvent {
        ts,
        level,
        event_type,
        payload,
    }) {
        eprintln!("run log write failed: {error}");
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
