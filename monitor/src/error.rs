//! Error types for the VRCNotif Monitor.
//!
//! Each module has its own error enum; [`MonitorError`] wraps them so the
//! orchestrator and binary can use a single `Result` type.

use thiserror::Error;

use crate::auth::AuthError;
use crate::credentials::CredentialError;
use crate::subscriber::SubscriberError;
use crate::tailer::TailError;

/// Errors that can occur during monitor operations.
///
/// # Examples
///
/// ```ignore
/// use vrcnotif_monitor::error::MonitorError;
///
/// fn cached_session(store: &FileCredentialStore) -> Result<Option<Session>, MonitorError> {
///     Ok(store.load_session()?)
/// }
/// ```
#[derive(Error, Debug)]
pub enum MonitorError {
    /// No candidate log directory exists.
    #[error("VRChat log directory not found")]
    LogDirectoryNotFound,

    /// The log pipeline failed.
    #[error("log tail error: {0}")]
    Tail(#[from] TailError),

    /// The notification pipeline failed.
    #[error("notification pipeline error: {0}")]
    Subscriber(#[from] SubscriberError),

    /// Authentication against the API failed.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The credential store failed.
    #[error("credential store error: {0}")]
    Credential(#[from] CredentialError),

    /// A pipeline task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Reading a second-factor code failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
