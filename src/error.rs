//! Error taxonomy for the proxy.
//!
//! Mirrors the kinds named in the design: request-admission errors never
//! reach the scheduler, scheduler errors are shared by every waiter in a
//! batch, and store errors are ambient I/O failures from the identity
//! store / usage ledger.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Top-level error surfaced by the admission front-end.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("prompt is required")]
    BadRequest,

    #[error("Invalid API key")]
    Unauthorized,

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the coalescing scheduler's dispatch step. Every
/// waiter in the failed batch receives a clone of this value.
#[derive(Debug, Error, Clone)]
pub enum SchedulerError {
    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error(
        "upstream returned {got} choices, expected {expected} ({waiters} waiters * n={n})"
    )]
    UpstreamShape {
        got: usize,
        expected: usize,
        waiters: usize,
        n: usize,
    },
}

/// Errors raised by the upstream HTTP client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to upstream failed: {0}")]
    Transport(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("failed to parse upstream response: {0}")]
    Decode(String),
}

/// Errors raised by the identity store / usage ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("name already exists: {0}")]
    NameExists(String),

    #[error("api key already exists")]
    KeyExists,

    #[error("no such key: {0}")]
    NotFound(String),
}

impl From<SchedulerError> for ProxyError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::ShuttingDown => ProxyError::ShuttingDown,
            SchedulerError::UpstreamTransport(msg) => {
                ProxyError::Upstream(UpstreamError::Transport(msg))
            }
            SchedulerError::UpstreamShape { got, expected, .. } => ProxyError::Upstream(
                UpstreamError::Decode(format!("expected {expected} choices, got {got}")),
            ),
        }
    }
}
