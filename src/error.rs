use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

pub const UNAUTHORIZED_UPDATE_REASON: &str = "This user is not authorised to update the alerts";

#[derive(Error, Debug)]
pub enum AlertSyncError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    NotFound(String),

    // Displayed verbatim to end users, keep the text stable
    #[error("{reason}")]
    Unauthorized { reason: String },

    #[error("Alert is paused, unpause it before changing its state")]
    InvalidTransition,

    #[error("Update alert state requires a new state")]
    NoOpTransition,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl AlertSyncError {
    pub fn unauthorized_update() -> Self {
        AlertSyncError::Unauthorized {
            reason: UNAUTHORIZED_UPDATE_REASON.to_owned(),
        }
    }

    /// True for failures of the backing store rather than domain rule violations.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            AlertSyncError::DatabaseError(_) | AlertSyncError::PoolError(_)
        )
    }
}
