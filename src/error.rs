use crate::track::TrackStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Account is not defined")]
    AccountNotDefined,
    #[error("invalid track transition {from:?} -> {to:?}")]
    InvalidTransition { from: TrackStatus, to: TrackStatus },
    #[error("engine run timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine run failed: {0}")]
    Engine(String),
    #[error("track task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive naming lock poisoned")]
    LockPoisoned,
}
