//! Filesystem backing store for a URL-keyed object cache
//!
//! Objects are stored as plain files named from a hash of their URL, with a
//! compact entry table tracking sizes and usage. When the store outgrows its
//! configured limit the least used, oldest entries are evicted.

mod config;
mod control;
mod entry;
mod error;
mod evict;
mod filename;
mod key;
mod store;
mod table;
mod types;

pub use config::{StoreParameters, DEFAULT_ENTRY_BITS, DEFAULT_IDENTIFIER_BITS};
pub use entry::StoreEntry;
pub use error::{Result, StoreError};
pub use filename::{store_path, MAX_IDENTIFIER_BITS};
pub use key::identifier;
pub use store::BackingStore;
pub use types::{CacheStats, Identifier, ObjectKind};
