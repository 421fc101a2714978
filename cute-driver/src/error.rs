//! Common error types for cute-driver.
//!
//! This module provides a centralized Error enum using thiserror. The
//! lifecycle boundary folds these into [`Envelope`](crate::envelope::Envelope)
//! error variants; [`Error::is_driver_fault`] decides which one.

use thiserror::Error;

/// Main error type for cute-driver operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (config files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding of configuration or parameter blobs
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inline payload larger than the envelope can hold
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Lifecycle call before init
    #[error("driver not initialized")]
    NotInitialized,

    /// Second init under the strict init policy
    #[error("driver already initialized")]
    AlreadyInitialized,

    /// No protocol registered under this id
    #[error("unknown protocol {0}")]
    UnknownProtocol(u32),

    /// Parameters rejected by the protocol
    #[error("invalid parameter for {protocol}: {reason}")]
    InvalidParameter {
        protocol: &'static str,
        reason: String,
    },

    /// Parameters built for a different protocol than the one selected
    #[error("parameters for {given} passed to protocol {expected}")]
    ParameterMismatch { expected: u32, given: &'static str },

    /// Handle that no longer denotes a live task
    #[error("stale task handle")]
    StaleHandle,

    /// Failure raised inside a protocol or board
    #[error("driver error: {0}")]
    Driver(String),

    /// Subsystem failure not tied to a protocol
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure originates in protocol or board logic rather
    /// than in the lifecycle machinery itself.
    pub fn is_driver_fault(&self) -> bool {
        matches!(
            self,
            Error::UnknownProtocol(_)
                | Error::InvalidParameter { .. }
                | Error::ParameterMismatch { .. }
                | Error::Driver(_)
        )
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
