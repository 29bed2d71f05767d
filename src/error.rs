//! Error types for surveyq.

use thiserror::Error;

use crate::model::{Domain, WorkItemId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The caller does not hold the live lease on the item it tried to mutate.
    #[error("{domain} item {id} is not leased by the caller (holder: {})", holder.as_deref().unwrap_or("none"))]
    LeaseConflict {
        domain: Domain,
        id: WorkItemId,
        holder: Option<String>,
    },

    #[error("{domain} item {id} is not eligible: {reason}")]
    EligibilityViolation {
        domain: Domain,
        id: WorkItemId,
        reason: String,
    },

    #[error("telephony provider error: {0}")]
    UpstreamProvider(String),

    #[error("recording unavailable: {0}")]
    RecordingUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
