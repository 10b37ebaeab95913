//! Error types for the watcher library.

use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors surfaced by the watcher.
///
/// Unresolvable devices and platform listener failures are not errors here: the
/// former are dropped silently, the latter end the session with a `Stopped`
/// notification.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("bluetooth: {0}")]
    Bluetooth(#[from] bluest::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
