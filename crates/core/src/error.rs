//! Error types

use thiserror::Error;

/// Strict UTF-8 decoding failed
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 {
        valid_up_to: usize,
        #[source]
        source: std::str::Utf8Error,
    },
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(source: std::str::Utf8Error) -> Self {
        DecodeError::InvalidUtf8 {
            valid_up_to: source.valid_up_to(),
            source,
        }
    }
}

/// Configuration rejected by validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} = {value} is out of range ({range})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        range: &'static str,
    },
}

/// Errors surfaced by the mirror worker
#[derive(Debug, Error)]
pub enum MirrorError {
    /// An event arrived before the `init` message
    #[error("event received before init; dropping {dropped} event(s)")]
    NotInitialized { dropped: usize },

    /// The worker task is gone
    #[error("mirror worker is closed")]
    WorkerClosed,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}
