use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("batch too large: {requested} entities exceeds cap of {max}")]
    BatchTooLarge { requested: usize, max: usize },

    #[error("calculation failed for {metric_id}: {message}")]
    Calculation { metric_id: String, message: String },

    #[error("record store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Serializable classification of an [`Error`], used in batch failure
/// reports where callers need a machine-readable tag rather than the
/// full error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParams,
    UnknownMetric,
    Forbidden,
    InvalidHierarchy,
    BatchTooLarge,
    Calculation,
    Store,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParams(_) => ErrorKind::InvalidParams,
            Error::UnknownMetric(_) => ErrorKind::UnknownMetric,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::InvalidHierarchy(_) => ErrorKind::InvalidHierarchy,
            Error::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            Error::Calculation { .. } => ErrorKind::Calculation,
            Error::Store(_) => ErrorKind::Store,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
