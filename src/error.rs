use thiserror::Error;

use crate::domain::ApplicationStatus;

/// Error code reported for operations invoked outside their permitted phase
pub const INVALID_PHASE_CODE: &str = "5308";

/// Message reported alongside [`INVALID_PHASE_CODE`]
pub const INVALID_PHASE_MESSAGE: &str = "Invalid operation for the current phase";

/// Main error type for the governance service
#[derive(Error, Debug)]
pub enum GovernanceError {
    // Business rule errors
    #[error("Invalid operation for the current phase: {operation} not allowed in {status}")]
    InvalidPhase {
        operation: &'static str,
        status: ApplicationStatus,
    },

    #[error("Application not found: {0}")]
    NotFound(String),

    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    Concurrency {
        aggregate_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Replay integrity failure: {0}")]
    ReplayIntegrity(String),

    #[error("Unknown allocator type: {0}")]
    UnknownAllocatorType(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Chain errors
    #[error("Log decode error: {0}")]
    Decode(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Address translation failed: {0}")]
    AddressTranslation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GovernanceError {
    pub fn is_invalid_phase(&self) -> bool {
        matches!(self, GovernanceError::InvalidPhase { .. })
    }

    /// Stable code reported to command-layer callers
    pub fn code(&self) -> &'static str {
        match self {
            GovernanceError::InvalidPhase { .. } => INVALID_PHASE_CODE,
            GovernanceError::NotFound(_) => "NOT_FOUND",
            GovernanceError::Concurrency { .. } => "CONCURRENCY_CONFLICT",
            GovernanceError::UnknownAllocatorType(_) | GovernanceError::Validation(_) => {
                "VALIDATION_ERROR"
            }
            _ => "INTERNAL_ERROR",
        }
    }

    /// HTTP status class for the command-layer status table
    pub fn status_code(&self) -> u16 {
        match self {
            GovernanceError::InvalidPhase { .. }
            | GovernanceError::UnknownAllocatorType(_)
            | GovernanceError::Validation(_) => 400,
            GovernanceError::NotFound(_) => 404,
            GovernanceError::Concurrency { .. } => 409,
            _ => 500,
        }
    }

    /// Client-facing message; internal failures are not echoed back
    pub fn public_message(&self) -> String {
        match self {
            GovernanceError::InvalidPhase { .. } => INVALID_PHASE_MESSAGE.to_string(),
            GovernanceError::NotFound(_)
            | GovernanceError::Concurrency { .. }
            | GovernanceError::UnknownAllocatorType(_)
            | GovernanceError::Validation(_) => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Result type alias for GovernanceError
pub type Result<T> = std::result::Result<T, GovernanceError>;
