//! Storage client abstraction.
//!
//! Records are JSON documents addressed by a case-insensitive string key and
//! versioned by an opaque ETag. Every conditional write goes through the ETag
//! check so concurrent writers cannot silently overwrite each other.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;
pub use traits::{Object, Precondition, StorageClient, encode};
