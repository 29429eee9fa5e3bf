use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sump not found: {0}")]
    SumpNotFound(String),
    #[error("pump not found: {0}")]
    PumpNotFound(String),
    #[error("road not found: {0}")]
    RoadNotFound(String),
    #[error("invalid report: {0}")]
    InvalidReport(String),
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("state lock poisoned")]
    StateLock,
}
