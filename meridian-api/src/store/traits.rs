//! StorageClient trait definitions.
//!
//! These traits abstract away the backing store, so handlers and the
//! controller work with records and ETags instead of a concrete database.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::error::Result;
use super::event::Event;

// =============================================================================
// Records
// =============================================================================

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// Record key as it was first written (case preserved).
    pub id: String,
    /// Concurrency token, replaced on every write.
    pub etag: String,
    pub updated_at: String,
    pub data: serde_json::Value,
}

impl Object {
    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Encode a typed value as a record payload.
pub fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Write precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write.
    None,
    /// The stored record must exist and carry this ETag.
    IfMatch(String),
    /// The record must not exist yet.
    IfNoneMatch,
}

impl Precondition {
    /// `IfMatch` when an ETag is known, unconditional otherwise.
    pub fn from_etag(etag: Option<&str>) -> Self {
        match etag {
            Some(etag) if !etag.is_empty() => Precondition::IfMatch(etag.to_string()),
            _ => Precondition::None,
        }
    }
}

// =============================================================================
// StorageClient
// =============================================================================

/// Key-value storage with ETag preconditions.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Get a record by key.
    async fn get(&self, id: &str) -> Result<Object>;

    /// List records whose key starts with `prefix` (case-insensitive),
    /// ordered by key.
    async fn query(&self, prefix: &str) -> Result<Vec<Object>>;

    /// Create or replace a record. Returns the stored record with its new ETag.
    async fn save(
        &self,
        id: &str,
        data: serde_json::Value,
        precondition: Precondition,
    ) -> Result<Object>;

    /// Delete a record, optionally requiring a matching ETag.
    async fn delete(&self, id: &str, etag: Option<&str>) -> Result<()>;

    /// Subscribe to record change events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
