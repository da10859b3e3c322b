//! Custom error types for the common library
//!
//! This module defines the error types reported by the database and
//! credential helpers.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Failure of the credential generator.
///
/// Only raised when the operating system refuses to hand out entropy.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
}
