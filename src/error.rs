//! Error types for the completion engine.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::model::TaskKind;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Backing-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Proof-image upload errors. Recoverable: the caller may retry or abandon.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Object store write failed at {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Empty proof image")]
    EmptyImage,
}

/// Verification-service errors. All variants route to the
/// degraded-continue/abandon branch, never to a silent failure.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Verification request failed: {0}")]
    Http(String),

    #[error("Verification service returned status {status}")]
    Status { status: u16 },

    #[error("Malformed verification response: {0}")]
    MalformedResponse(String),
}

/// Detail-schema validation errors. Blocks finalize; the pending record
/// is preserved so the caller can correct and resubmit.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required metric: {name}")]
    MissingRequired { name: String },

    #[error("Metric {name} expected {expected}, got {got}")]
    WrongType {
        name: String,
        expected: String,
        got: String,
    },

    #[error("Unknown metric: {name}")]
    UnknownMetric { name: String },
}

/// Workflow orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("Invalid details: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Day already satisfied: {task_kind} on {date} for user {user_id}")]
    Conflict {
        user_id: String,
        task_kind: TaskKind,
        date: NaiveDate,
    },

    #[error("Completion {id} not found")]
    NotFound { id: Uuid },

    #[error("Workflow session {id} not found")]
    SessionNotFound { id: Uuid },

    #[error("Event {event} is not valid in state {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Completion {id} is {status}, expected {expected}")]
    WrongStatus {
        id: Uuid,
        status: String,
        expected: String,
    },

    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(TaskKind),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
