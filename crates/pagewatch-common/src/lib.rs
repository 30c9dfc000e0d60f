//! # PageWatch Common
//!
//! Shared error types, logging configuration, and timeout helpers for the
//! PageWatch visibility engine.
//!
//! ## Features
//!
//! - Unified error type with per-category classification
//! - Logging configuration and setup
//! - Timeout utility for racing futures against a deadline

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Unified error type for PageWatch.
#[derive(Error, Debug)]
pub enum PageWatchError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A registered handler reported a failure.
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// A registered handler panicked while running.
    #[error("Handler panicked: {message}")]
    Panicked { message: String },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl PageWatchError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a panic error from a caught panic payload.
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }

    /// Whether this error came from a handler exceeding its time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PageWatchError::Timeout(_))
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            PageWatchError::Config { .. } => "config",
            PageWatchError::Handler { .. } => "handler",
            PageWatchError::Panicked { .. } => "panic",
            PageWatchError::Io(_) => "io",
            PageWatchError::Json(_) => "json",
            PageWatchError::Timeout(_) => "timeout",
            PageWatchError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for PageWatch operations.
pub type Result<T> = std::result::Result<T, PageWatchError>;
