//! Error handling for the Farm Feed Management Platform
//!
//! Provides consistent error values in Spanish and English

use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_es: String,
    },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Operation blocked by dependent records: {message}")]
    DependencyBlocked {
        resource: String,
        message: String,
        message_es: String,
    },

    /// The version predicate of a manual stock correction matched no row.
    /// The caller must reload the ledger row and retry.
    #[error("Concurrent modification of {resource}; reload and retry")]
    ConcurrencyConflict { resource: String },

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;
