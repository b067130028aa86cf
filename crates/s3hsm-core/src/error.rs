use std::path::PathBuf;

use thiserror::Error;

pub type HsmResult<T> = Result<T, HsmError>;

#[derive(Debug, Error)]
pub enum HsmError {
    #[error("config error: {0}")]
    Config(String),

    #[error("source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed location: {0}")]
    MalformedLocation(String),

    #[error("unsupported cipher type: {0}")]
    UnsupportedCipher(String),

    #[error("bad key encoding: {0}")]
    BadKeyEncoding(String),

    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HsmError {
    /// True for errors caused by a bad location string handed in by the caller.
    pub fn is_bad_location(&self) -> bool {
        matches!(
            self,
            HsmError::MalformedLocation(_)
                | HsmError::UnsupportedCipher(_)
                | HsmError::BadKeyEncoding(_)
        )
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        HsmError::Backend(err.to_string())
    }
}
