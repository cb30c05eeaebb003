//! Error types for logdict
//!
//! Provides a unified error type for all operations.
//!
//! `DictError` is `Clone` so the command actor can capture a fatal fault once
//! and hand the very same error to every later caller.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using DictError
pub type Result<T> = std::result::Result<T, DictError>;

/// Unified error type for logdict operations
#[derive(Debug, Clone, Error)]
pub enum DictError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Log / Storage Errors
    // -------------------------------------------------------------------------
    #[error("Log corruption detected: {0}")]
    Corruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid envelope: {0}")]
    Envelope(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Actor Errors
    // -------------------------------------------------------------------------
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Engine fatal error: {0}")]
    EngineFatal(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Dictionary has been disposed")]
    Disposed,
}

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// The engine never came up; every submission fails with the same error
    Initialization,

    /// Only the command that raised it failed
    Operation,

    /// The caller misused the API (e.g. a second concurrent iteration)
    Protocol,

    /// The engine broke mid-operation; every later submission fails
    Fatal,

    /// The dictionary was disposed
    Terminated,
}

impl DictError {
    /// Classify this error according to its blast radius
    pub fn class(&self) -> FaultClass {
        match self {
            DictError::Initialization(_) => FaultClass::Initialization,
            DictError::Io(_) | DictError::EngineFatal(_) => FaultClass::Fatal,
            DictError::ProtocolViolation(_) => FaultClass::Protocol,
            DictError::Disposed => FaultClass::Terminated,
            DictError::Corruption(_)
            | DictError::Storage(_)
            | DictError::Checkpoint(_)
            | DictError::Serialization(_)
            | DictError::Envelope(_)
            | DictError::Config(_) => FaultClass::Operation,
        }
    }

    /// Whether the actor must stop serving after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), FaultClass::Fatal)
    }
}

impl From<std::io::Error> for DictError {
    fn from(err: std::io::Error) -> Self {
        DictError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for DictError {
    fn from(err: serde_json::Error) -> Self {
        DictError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for DictError {
    fn from(err: bincode::Error) -> Self {
        DictError::Serialization(err.to_string())
    }
}
