// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Error Types
 * Error taxonomy for scan orchestration and vulnerability correlation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::circuit_breaker::Dependency;
use crate::types::{ScanStatus, ScanType};

/// Main error type shared by the orchestrator, scanner adapters and the
/// correlation engine
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Target rejected by the network-safety policy
    #[error("Validation error: {0}")]
    Validation(#[from] TargetError),

    /// Scan options do not fit the requested scan type
    #[error("Invalid scan options: {0}")]
    InvalidOptions(String),

    /// Scanner engine failures (subprocess or API)
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Persistence errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Breaker for the dependency is open, the call was never attempted
    #[error("Circuit breaker open for {dependency}")]
    CircuitOpen { dependency: Dependency },

    /// Every retry attempt failed
    #[error("Operation '{operation}' failed after {attempts} attempts ({elapsed:?}): {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<ScannerError>,
        elapsed: Duration,
    },

    /// Transport-level failure talking to an HTTP dependency
    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Non-success HTTP status from a dependency
    #[error("HTTP {status_code} from {url}: {message}")]
    Http {
        status_code: u16,
        url: String,
        message: String,
    },

    /// Rate limit errors
    #[error("Rate limit exceeded for {dependency}: retry after {retry_after:?}")]
    RateLimited {
        dependency: String,
        retry_after: Option<Duration>,
    },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("No scanner available for scan type {0}")]
    NoScannerAvailable(ScanType),

    #[error("Scan {scan_id} is already {status}")]
    AlreadyTerminal { scan_id: Uuid, status: ScanStatus },

    #[error("Scan {scan_id} cannot move from {from} to {to}")]
    InvalidTransition {
        scan_id: Uuid,
        from: ScanStatus,
        to: ScanStatus,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Scan {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Queue error: {0}")]
    Queue(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// General errors
    #[error("Scanner error: {0}")]
    General(String),
}

/// Reasons a scan target is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("target is empty")]
    Empty,

    #[error("no targets supplied")]
    NoTargets,

    #[error("malformed CIDR '{target}': {reason}")]
    MalformedCidr { target: String, reason: String },

    #[error("malformed IP address '{0}'")]
    MalformedIp(String),

    #[error(
        "'{0}' is a public address; only 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16, \
         127.0.0.0/8 and 169.254.0.0/16 may be scanned"
    )]
    PublicAddress(String),

    #[error("'{0}' is not an IP address or CIDR network; hostnames are never accepted")]
    Hostname(String),

    #[error("{}", describe_failures(.0))]
    Items(Vec<TargetFailure>),
}

/// One failing element of a target list, 1-indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub index: usize,
    pub target: String,
    pub reason: TargetError,
}

fn describe_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("target {} ('{}'): {}", f.index, f.target, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Scanner engine failures
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{engine} is not installed or not executable: {reason}")]
    NotInstalled { engine: String, reason: String },

    #[error("{engine} exited with status {code:?}: {stderr}")]
    Crashed {
        engine: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{engine} produced unparseable output: {reason}")]
    MalformedOutput { engine: String, reason: String },

    #[error("{engine} timed out after {timeout:?}")]
    Timeout { engine: String, timeout: Duration },

    #[error("{engine} authentication failed: {reason}")]
    Authentication { engine: String, reason: String },

    #[error("{engine} job {job_id} failed: {reason}")]
    JobFailed {
        engine: String,
        job_id: String,
        reason: String,
    },

    #[error("{engine} cannot scan target {target}: {reason}")]
    UnsupportedTarget {
        engine: String,
        target: String,
        reason: String,
    },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection pool exhausted: {reason}")]
    PoolExhausted { reason: String },

    #[error("Query timeout after {timeout:?}")]
    QueryTimeout { timeout: Duration },

    #[error("Row decode failed: {reason}")]
    Decode { reason: String },

    #[error("Database error: {0}")]
    Other(String),
}

/// Flat classification used by the retry allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    Transient,
    EngineCrash,
    RateLimited,
    CircuitOpen,
    Exhausted,
    NotFound,
    State,
    Cancelled,
    Configuration,
    Database,
    Other,
}

impl ErrorKind {
    /// Kinds retried by default
    pub fn default_retryable() -> Vec<ErrorKind> {
        vec![
            ErrorKind::Timeout,
            ErrorKind::Transient,
            ErrorKind::EngineCrash,
            ErrorKind::RateLimited,
        ]
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Crashed { .. } => ErrorKind::EngineCrash,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::NotInstalled { .. } => ErrorKind::Configuration,
            EngineError::Authentication { .. } => ErrorKind::Configuration,
            EngineError::UnsupportedTarget { .. } => ErrorKind::Validation,
            EngineError::MalformedOutput { .. } => ErrorKind::Other,
            EngineError::JobFailed { .. } => ErrorKind::Other,
        }
    }
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::ConnectionFailed { .. }
            | DatabaseError::PoolExhausted { .. }
            | DatabaseError::QueryTimeout { .. } => ErrorKind::Transient,
            _ => ErrorKind::Database,
        }
    }
}

impl ScannerError {
    /// Classify this error for retry decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScannerError::Validation(_) | ScannerError::InvalidOptions(_) => ErrorKind::Validation,
            ScannerError::Engine(e) => e.kind(),
            ScannerError::Database(e) => e.kind(),
            ScannerError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ScannerError::RetryExhausted { .. } => ErrorKind::Exhausted,
            ScannerError::Network { .. } => ErrorKind::Transient,
            ScannerError::Http { status_code, .. } => match status_code {
                408 => ErrorKind::Timeout,
                429 => ErrorKind::RateLimited,
                500 | 502 | 503 | 504 => ErrorKind::Transient,
                _ => ErrorKind::Other,
            },
            ScannerError::RateLimited { .. } => ErrorKind::RateLimited,
            ScannerError::Timeout { .. } => ErrorKind::Timeout,
            ScannerError::NotFound { .. } => ErrorKind::NotFound,
            ScannerError::AlreadyTerminal { .. } | ScannerError::InvalidTransition { .. } => {
                ErrorKind::State
            }
            ScannerError::Cancelled(_) => ErrorKind::Cancelled,
            ScannerError::NoScannerAvailable(_) | ScannerError::Configuration(_) => {
                ErrorKind::Configuration
            }
            ScannerError::Queue(_) => ErrorKind::Transient,
            ScannerError::General(_) => ErrorKind::Other,
        }
    }

    /// Check if error is retryable under the default allow-list
    pub fn is_retryable(&self) -> bool {
        ErrorKind::default_retryable().contains(&self.kind())
    }

    /// Whether this failure should count against a circuit breaker.
    /// Caller mistakes and cancellations say nothing about dependency health.
    pub fn counts_as_dependency_failure(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::CircuitOpen
                | ErrorKind::Cancelled
                | ErrorKind::NotFound
                | ErrorKind::State
        )
    }

    /// Get suggested retry delay for this error
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            ScannerError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the breaker for a dependency rejected the call, directly or
    /// as the last error of a retry sequence
    pub fn is_circuit_open(&self) -> bool {
        match self {
            ScannerError::CircuitOpen { .. } => true,
            ScannerError::RetryExhausted { last_error, .. } => last_error.is_circuit_open(),
            _ => false,
        }
    }
}

/// Convert reqwest errors to our error types
impl From<reqwest::Error> for ScannerError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();

        if err.is_timeout() {
            ScannerError::Timeout {
                duration: Duration::from_secs(30),
            }
        } else if let Some(status) = err.status() {
            ScannerError::Http {
                status_code: status.as_u16(),
                url,
                message: err.to_string(),
            }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ScannerError::Network {
                url,
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            ScannerError::General(format!("Failed to decode response from {}: {}", url, err))
        } else {
            ScannerError::General(err.to_string())
        }
    }
}

/// Convert tokio-postgres errors to our error types
impl From<tokio_postgres::Error> for ScannerError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            ScannerError::Database(DatabaseError::ConnectionFailed {
                reason: err.to_string(),
            })
        } else {
            ScannerError::Database(DatabaseError::Other(err.to_string()))
        }
    }
}

/// Convert deadpool errors to our error types
impl From<deadpool_postgres::PoolError> for ScannerError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        ScannerError::Database(DatabaseError::PoolExhausted {
            reason: err.to_string(),
        })
    }
}

/// Result type for scanner operations
pub type ScannerResult<T> = Result<T, ScannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_never_retryable() {
        let err = ScannerError::Validation(TargetError::PublicAddress("8.8.8.8".to_string()));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert!(!err.counts_as_dependency_failure());
    }

    #[test]
    fn test_engine_crash_is_retryable() {
        let err = ScannerError::Engine(EngineError::Crashed {
            engine: "nmap".to_string(),
            code: Some(1),
            stderr: "segfault".to_string(),
        });
        assert!(err.is_retryable());
        assert!(err.counts_as_dependency_failure());
    }

    #[test]
    fn test_http_status_classification() {
        let http = |code| ScannerError::Http {
            status_code: code,
            url: "http://nvd".to_string(),
            message: String::new(),
        };
        assert_eq!(http(503).kind(), ErrorKind::Transient);
        assert_eq!(http(429).kind(), ErrorKind::RateLimited);
        assert_eq!(http(404).kind(), ErrorKind::Other);
        assert!(!http(400).is_retryable());
    }

    #[test]
    fn test_item_failures_are_itemized() {
        let err = TargetError::Items(vec![
            TargetFailure {
                index: 2,
                target: "8.8.8.8".to_string(),
                reason: TargetError::PublicAddress("8.8.8.8".to_string()),
            },
            TargetFailure {
                index: 3,
                target: "google.com".to_string(),
                reason: TargetError::Hostname("google.com".to_string()),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("target 2 ('8.8.8.8')"));
        assert!(msg.contains("public"));
        assert!(msg.contains("target 3 ('google.com')"));
    }

    #[test]
    fn test_circuit_open_seen_through_retry_exhaustion() {
        let err = ScannerError::RetryExhausted {
            operation: "nvd".to_string(),
            attempts: 1,
            last_error: Box::new(ScannerError::CircuitOpen {
                dependency: Dependency::Nvd,
            }),
            elapsed: Duration::from_millis(1),
        };
        assert!(err.is_circuit_open());
    }
}
