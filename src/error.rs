//! Error types for the audit consensus core

use thiserror::Error;

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {

    // =============================
    // Input Errors
    // =============================

    #[error("Invalid statement type: {0}")]
    InvalidStatementType(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid tolerance profile: {0}")]
    InvalidTolerance(String),

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Result path conflict: {0}")]
    PathConflict(String),

    #[error("No result at path: {0}")]
    UnknownPath(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Failure of a single arithmetic primitive.
///
/// Never escapes the engine as an `Err`: it is folded into the result's
/// `error` field and tagged `precision = error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
}
