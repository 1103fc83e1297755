//! Crate-level error type for the fingerprinting pipeline.
//!
//! Storage failures keep their own [`DbError`](crate::db::DbError) and are
//! wrapped here so callers can match on the pipeline stage that failed.

use crate::db::DbError;

/// Error type for decode, canonicalization, and recognition operations
#[derive(Debug)]
pub enum Error {
    /// File extension is not in the supported-format allowlist
    UnsupportedFormat(String),
    /// Container decoder failed or produced no audio
    DecodeFailed(String),
    /// Empty sample buffer handed to the resampler
    InvalidAudio,
    /// Index storage failure
    Db(DbError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnsupportedFormat(ext) => write!(f, "unsupported audio format: {}", ext),
            Error::DecodeFailed(msg) => write!(f, "failed to decode audio: {}", msg),
            Error::InvalidAudio => write!(f, "invalid audio: empty sample buffer"),
            Error::Db(e) => write!(f, "index error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for Error {
    fn from(e: DbError) -> Self {
        Error::Db(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
