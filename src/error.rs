//! Error types
//!
//! Precondition violations surfaced by the host container, and failures
//! reported by the platform windowing layer.

use thiserror::Error;

use crate::shared::WindowHandle;

/// Rejected host operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("application already is running")]
    AlreadyStarted,

    #[error("window filters cannot be changed once the application is running")]
    FiltersFrozen,

    #[error("window filter '{name}' declares neither a style nor an extended style mask")]
    MalformedFilter { name: String },

    #[error("filter index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("entry path is empty")]
    EmptyEntryPath,

    #[error("failed to create execution context: {0:#}")]
    Context(#[source] anyhow::Error),

    #[error("failed to spawn hosted thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failures of a single platform call against a single window
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("window {0} does not exist")]
    InvalidWindow(WindowHandle),

    #[error("{op} failed with code {code}")]
    CallFailed { op: &'static str, code: i32 },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

pub type HostResult<T> = std::result::Result<T, HostError>;
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
