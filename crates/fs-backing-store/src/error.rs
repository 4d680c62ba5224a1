//! Error types for the filesystem backing store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// `initialise` called on a store that is already open
    AlreadyInitialised,
    /// An index or scratch allocation could not be satisfied
    OutOfMemory,
    /// Key not present, payload file missing, or control record absent
    NotFound,
    /// Control record malformed or from another format version, or the
    /// store is not open
    InitFailed(String),
    /// Short or failed write to the entries table or a payload file
    SaveFailed(Box<std::io::Error>),
    /// Geometry the store cannot represent
    BadParameter(String),
    Io(Box<std::io::Error>),
}

impl StoreError {
    /// Misses are ordinary results for callers of `fetch` and `invalidate`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub(crate) fn save_failed(err: std::io::Error) -> Self {
        StoreError::SaveFailed(Box::new(err))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyInitialised => write!(f, "Backing store already initialised"),
            StoreError::OutOfMemory => write!(f, "Out of memory"),
            StoreError::NotFound => write!(f, "Not found"),
            StoreError::InitFailed(msg) => write!(f, "Initialisation failed: {}", msg),
            StoreError::SaveFailed(err) => write!(f, "Save failed: {}", err),
            StoreError::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            StoreError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::SaveFailed(err) => Some(err.as_ref()),
            StoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<std::collections::TryReserveError> for StoreError {
    fn from(_: std::collections::TryReserveError) -> Self {
        StoreError::OutOfMemory
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
