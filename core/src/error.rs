use crate::status::QueryStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown channel '{channel}'")]
    UnknownChannel { channel: String },

    #[error("Unknown filter object '{object}' for channel '{channel}'")]
    UnknownFilterObject { channel: String, object: String },

    #[error("Invalid timezone '{timezone}'")]
    InvalidTimezone { timezone: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No transformation for metric '{metric}' in category '{display_category}'")]
    UnknownKpiMetric {
        display_category: String,
        metric: String,
    },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Status surfaced to callers when this error ends a query.
    pub fn status(&self) -> QueryStatus {
        match self {
            EngineError::UnknownChannel { .. }
            | EngineError::UnknownFilterObject { .. }
            | EngineError::InvalidTimezone { .. }
            | EngineError::InvalidQuery(_)
            | EngineError::UnknownKpiMetric { .. } => QueryStatus::BadRequest,
            _ => QueryStatus::InternalError,
        }
    }

    /// Message safe to show users. Internal failures stay generic.
    pub fn user_message(&self) -> String {
        match self.status() {
            QueryStatus::BadRequest => self.to_string(),
            _ => "internal error while executing query".to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
