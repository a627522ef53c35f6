use std::fmt;

use crate::storage::StoreError;

/// Errors surfaced by the repository and the services built on it.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// The referenced document or project does not exist
    NotFound(String),
    /// A project already exists under the key
    DuplicateKey(String),
    /// Compare-and-swap kept losing to concurrent writers
    Conflict { attempts: u32 },
    /// Backend failure
    Store(StoreError),
    /// A stored body could not be encoded or decoded
    Codec(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NotFound(what) => write!(f, "Not found: {what}"),
            SyncError::DuplicateKey(key) => write!(f, "Duplicate key: {key}"),
            SyncError::Conflict { attempts } => {
                write!(f, "Write conflict: gave up after {attempts} attempts")
            }
            SyncError::Store(e) => write!(f, "Store error: {e}"),
            SyncError::Codec(e) => write!(f, "Codec error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
