/// Errors surfaced by definitions and alert stores.
///
/// The registry treats these as opaque backend failures and propagates them
/// verbatim; no listener is notified when a store operation fails.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An insert collided with an existing primary key.
    #[error("Store: key already exists [{0}]")]
    Duplicate(String),

    /// An update or delete referenced a missing primary key.
    #[error("Store: key not found [{0}]")]
    Missing(String),

    /// Reading bootstrap data from disk failed.
    #[error("Store: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bootstrap or entity JSON failed to parse.
    #[error("Store: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend-specific failure (connectivity, timeout, corruption).
    #[error("Store: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
