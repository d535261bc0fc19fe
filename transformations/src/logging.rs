//! Structured request events and the sinks that record them.
//!
//! The coordinator and the HTTP layer emit [`LogEvent`]s through a shared
//! [`LogSink`]. Sinks are used by many in-flight requests at once, so every
//! implementation here is append-only.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogResult {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: String,
    pub level: LogLevel,
    pub user: String,
    pub endpoint: String,
    pub params: Value,
    pub duration_ms: u64,
    pub result: LogResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LogEvent {
    pub fn success(user: &str, endpoint: &str, params: Value, duration: Duration) -> Self {
        Self::at_level(LogLevel::Info, LogResult::Success, user, endpoint, params, duration)
    }

    pub fn failure(
        user: &str,
        endpoint: &str,
        params: Value,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self::at_level(LogLevel::Error, LogResult::Error, user, endpoint, params, duration)
            .with_message(message)
    }

    fn at_level(
        level: LogLevel,
        result: LogResult,
        user: &str,
        endpoint: &str,
        params: Value,
        duration: Duration,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level,
            user: user.to_string(),
            endpoint: endpoint.to_string(),
            params,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            result,
            message: None,
            request_id: None,
            operation: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(str::to_string);
        self
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    /// One-line human readable form.
    pub fn render(&self) -> String {
        let level = match self.level {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        };
        let result = match self.result {
            LogResult::Success => "success",
            LogResult::Error => "error",
        };
        let mut line = format!(
            "[{}] [{}] User: {}, Endpoint: {}, Duration: {}ms, Result: {}",
            self.timestamp, level, self.user, self.endpoint, self.duration_ms, result
        );
        if let Some(operation) = &self.operation {
            line.push_str(&format!(", Operation: {}", operation));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(", Message: {}", message));
        }
        line
    }
}

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log(&self, event: &LogEvent) -> Result<()>;
}

/// Writes events through the `log` facade.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl LogSink for ConsoleSink {
    async fn log(&self, event: &LogEvent) -> Result<()> {
        match event.level {
            LogLevel::Info => log::info!("{}", event.render()),
            LogLevel::Error => log::error!("{}", event.render()),
        }
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for FileSink {
    async fn log(&self, event: &LogEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).map_err(std::io::Error::from)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn errors(&self) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == LogLevel::Error)
            .collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn log(&self, event: &LogEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Forwards every event to each sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl LogSink for FanoutSink {
    async fn log(&self, event: &LogEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.log(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Records an event, reporting sink failures without propagating them.
pub async fn emit(sink: &dyn LogSink, event: LogEvent) {
    if let Err(e) = sink.log(&event).await {
        log::warn!("Failed to record log event: {}", e);
    }
}
