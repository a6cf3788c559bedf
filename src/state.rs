use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};

use crate::error::ExecutionError;
use crate::types::{Config, ExecutionRecord, ExecutionTrigger};
use crate::workflow::DeliveryGuard;

/// Maximum number of execution records to keep in memory
const MAX_HISTORY_SIZE: usize = 100;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "PREREAD_CONFIG";

/// Process-wide state shared by the scheduler, the executor and the binary
pub struct AppState {
    pub config: RwLock<Config>,
    pub execution_history: Mutex<Vec<ExecutionRecord>>,
    pub last_scheduled_run: Mutex<Option<DateTime<Utc>>>,
    pub delivery: Arc<DeliveryGuard>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
            execution_history: Mutex::new(Vec::new()),
            last_scheduled_run: Mutex::new(None),
            delivery: Arc::new(DeliveryGuard::new()),
        }
    }

    /// Add an execution record to history, newest first
    pub fn add_execution_record(&self, record: ExecutionRecord) {
        let mut history = self.execution_history.lock();
        history.insert(0, record);
        history.truncate(MAX_HISTORY_SIZE);
    }

    /// Update an existing execution record
    pub fn update_execution_record(&self, id: &str, f: impl FnOnce(&mut ExecutionRecord)) {
        if let Some(record) = self.execution_history.lock().iter_mut().find(|r| r.id == id) {
            f(record);
        }
    }

    /// Get execution history
    pub fn get_execution_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.execution_history
            .lock()
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Record when a scheduled run last occurred
    pub fn set_last_scheduled_run(&self, time: DateTime<Utc>) {
        *self.last_scheduled_run.lock() = Some(time);
    }

    /// Get when the digest last ran on schedule
    pub fn get_last_scheduled_run(&self) -> Option<DateTime<Utc>> {
        *self.last_scheduled_run.lock()
    }
}

/// Get the config file path (~/.preread/config.json unless overridden)
pub fn config_path() -> Result<PathBuf, ExecutionError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| {
        ExecutionError::ConfigurationError("Could not find home directory".to_string())
    })?;
    Ok(home.join(".preread").join("config.json"))
}

/// Load configuration from `path`.
///
/// A missing file yields the defaults. A present but unreadable or invalid
/// file is an error.
pub fn load_config(path: &Path) -> Result<Config, ExecutionError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        let config = Config::default();
        validate_config(&config)?;
        return Ok(config);
    }

    let content = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content).map_err(|e| {
        ExecutionError::ConfigurationError(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject configurations no run could succeed with.
pub fn validate_config(config: &Config) -> Result<(), ExecutionError> {
    let invalid = |msg: String| Err(ExecutionError::ConfigurationError(msg));

    for tz in [config.timezone.as_str(), config.schedule_timezone()] {
        if tz.parse::<Tz>().is_err() {
            return invalid(format!("Invalid timezone: {}", tz));
        }
    }
    crate::scheduler::parse_cron(&config.schedule.cron)?;

    let matching = &config.matching;
    let w = matching.weights;
    if w.title < 0.0 || w.attendees < 0.0 || w.recency < 0.0 {
        return invalid("Match weights must not be negative".to_string());
    }
    if w.title + w.attendees + w.recency <= 0.0 {
        return invalid("Match weights must sum to a positive value".to_string());
    }
    if matching.top_k == 0 {
        return invalid("matching.topK must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&matching.min_score) {
        return invalid(format!(
            "matching.minScore must be between 0 and 1, got {}",
            matching.min_score
        ));
    }
    if matching.recency_half_life_days <= 0.0 {
        return invalid("matching.recencyHalfLifeDays must be positive".to_string());
    }
    let context = &config.context;
    if context.excerpt_chars == 0 || context.payload_bytes == 0 || context.notes_chars == 0 {
        return invalid("context budgets must be positive".to_string());
    }
    if config.notes.enabled && config.notes.marker.trim().is_empty() {
        return invalid("notes.marker must not be empty".to_string());
    }
    if config.timeouts.call_secs == 0 || config.timeouts.run_secs == 0 {
        return invalid("timeouts must be positive".to_string());
    }
    Ok(())
}

/// Create a new execution record
pub fn create_execution_record(day: NaiveDate, trigger: ExecutionTrigger) -> ExecutionRecord {
    ExecutionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        trigger,
        day,
        started_at: Utc::now(),
        finished_at: None,
        outcome: None,
        meeting_count: None,
        error_message: None,
    }
}
