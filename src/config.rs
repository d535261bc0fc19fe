use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use transformations::{FailurePolicy, UnknownOperationPolicy, DEFAULT_MAX_OPERATIONS};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub jwt_secret: Option<String>,
    pub log_file: Option<PathBuf>,
    pub request_timeout: Duration,
    pub max_operations: usize,
    pub max_body_bytes: usize,
    pub unknown_operation_policy: UnknownOperationPolicy,
    pub failure_policy: FailurePolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: non_empty("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(8080),
            workers: non_empty("WORKERS")
                .and_then(|w| w.trim().parse().ok())
                .filter(|w| *w > 0)
                .unwrap_or_else(num_cpus::get),
            jwt_secret: non_empty("JWT_SECRET"),
            log_file: non_empty("LOG_FILE").map(PathBuf::from),
            request_timeout: Duration::from_secs(
                non_empty("REQUEST_TIMEOUT_SECS")
                    .and_then(|t| t.trim().parse().ok())
                    .filter(|t| *t > 0)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            max_operations: non_empty("MAX_OPERATIONS")
                .and_then(|m| m.trim().parse().ok())
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_MAX_OPERATIONS),
            max_body_bytes: non_empty("MAX_BODY_BYTES")
                .and_then(|m| m.trim().parse().ok())
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            unknown_operation_policy: non_empty("UNKNOWN_OPERATION_POLICY")
                .and_then(|p| UnknownOperationPolicy::from_name(&p))
                .unwrap_or_default(),
            failure_policy: non_empty("FAILURE_POLICY")
                .and_then(|p| FailurePolicy::from_name(&p))
                .unwrap_or_default(),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.jwt_secret.is_some()
    }
}

// The secret never reaches the startup log.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("workers", &self.workers)
            .field("auth_enabled", &self.auth_enabled())
            .field("log_file", &self.log_file)
            .field("request_timeout", &self.request_timeout)
            .field("max_operations", &self.max_operations)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("unknown_operation_policy", &self.unknown_operation_policy)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}
