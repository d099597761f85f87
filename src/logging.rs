use chrono::Utc;
use serde_json::json;

/// Logger struct for handling structured logging
///
/// Every record carries the component scope it was created for and is
/// emitted through `tracing`, so the embedding application decides where it
/// ends up (browser console, stdout, a test writer).
#[derive(Clone, Debug)]
pub struct Logger {
    scope: String,
}

impl Logger {
    /// Create a new Logger instance
    ///
    /// # Arguments
    ///
    /// * `scope` - Name of the component emitting the records (e.g. `router`)
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Log a debug message
    pub fn debug(&self, message: &str, data: Option<serde_json::Value>) {
        self.log("DEBUG", message, data);
    }

    /// Log an info message
    ///
    /// # Arguments
    ///
    /// * `message` - The log message
    /// * `data` - Optional additional data to include in the log
    pub fn info(&self, message: &str, data: Option<serde_json::Value>) {
        self.log("INFO", message, data);
    }

    /// Log a warning message
    ///
    /// # Arguments
    ///
    /// * `message` - The log message
    /// * `data` - Optional additional data to include in the log
    pub fn warn(&self, message: &str, data: Option<serde_json::Value>) {
        self.log("WARN", message, data);
    }

    /// Log an error message
    ///
    /// # Arguments
    ///
    /// * `message` - The log message
    /// * `data` - Optional additional data to include in the log
    pub fn error(&self, message: &str, data: Option<serde_json::Value>) {
        self.log("ERROR", message, data);
    }

    /// Internal method to build the JSON record and hand it to `tracing`
    fn log(&self, level: &str, message: &str, data: Option<serde_json::Value>) {
        let record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "scope": self.scope,
            "message": message,
            "data": data
        });

        match level {
            "DEBUG" => tracing::debug!(target: "admin_storage", scope = %self.scope, "{}", record),
            "WARN" => tracing::warn!(target: "admin_storage", scope = %self.scope, "{}", record),
            "ERROR" => tracing::error!(target: "admin_storage", scope = %self.scope, "{}", record),
            _ => tracing::info!(target: "admin_storage", scope = %self.scope, "{}", record),
        }
    }
}

/// Macro to create a JSON object for additional log data
///
/// Usage: log_data!("key1" => "value1", "key2" => 42)
#[macro_export]
macro_rules! log_data {
    ($($key:expr => $value:expr),* $(,)?) => {
        Some(serde_json::json!({ $($key: $value),* }))
    };
}
