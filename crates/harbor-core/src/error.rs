//! Error types for harbor-core.

use crate::types::IsolationLevel;
use crate::SandboxId;
use thiserror::Error;

/// Result type alias for harbor-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during sandbox and pool operations.
///
/// Sandbox-level lifecycle calls never return these directly; they record the
/// failure on the sandbox and report a boolean. Manager, pool and runtime
/// operations propagate them so callers can tell "nothing available right
/// now" apart from "something is broken".
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sandbox could not be brought up.
    #[error("sandbox creation failed for template {template}: {reason}")]
    CreationFailed {
        /// Template the sandbox was being created from
        template: String,
        /// Why `create()` failed
        reason: String,
    },

    /// No template is registered under this name
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Sandbox not found
    #[error("sandbox not found: {0}")]
    NotFound(SandboxId),

    /// The manager refuses to hold more sandboxes
    #[error("max sandbox limit reached ({0})")]
    CapacityReached(usize),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Isolation backend refused or failed to set up a sandbox
    #[error("{level} backend error: {message}")]
    Backend {
        /// Isolation level of the failing backend
        level: IsolationLevel,
        /// Error message from the backend
        message: String,
    },

    /// Blob store failure that is not a plain I/O error
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
