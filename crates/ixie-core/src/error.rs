use crate::resolver::ResolveError;
use crate::transform::TransformError;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for ixie operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("No ixie config found from {start}")]
    ConfigNotFound { start: PathBuf },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A request path escaped the base directory.
    #[error("unauthorized: {path} is outside the base directory")]
    Unauthorized { path: String },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    #[must_use]
    pub fn unauthorized(path: impl Into<String>) -> Self {
        Self::Unauthorized { path: path.into() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
