//! Storage Layer
//!
//! Opaque named-blob persistence for scheduler snapshots, with an
//! in-memory store and a SQLite store.

mod repository;
mod sqlite;

pub use repository::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Named blob store used for snapshots
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Load a blob; `None` when nothing was saved under `name`
    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Encode a snapshot value
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(postcard::to_allocvec(value)?)
}

/// Decode a snapshot value
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, StorageError> {
    Ok(postcard::from_bytes(data)?)
}
