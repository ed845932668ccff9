//! In-Memory Store

use crate::{StateStore, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Store keeping snapshots in process memory
pub struct MemoryStore {
    /// Blobs by name
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    /// Total saves performed (for statistics)
    writes: Mutex<usize>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        info!("Creating in-memory state store");
        Self {
            blobs: Mutex::new(HashMap::new()),
            writes: Mutex::new(0),
        }
    }

    /// Number of saves performed
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    /// Names currently stored
    pub fn names(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        blobs.insert(name.to_string(), data.to_vec());

        let mut writes = self.writes.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        *writes += 1;

        debug!("Saved {} ({} bytes)", name, data.len());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blobs = self.blobs.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        Ok(blobs.get(name).cloned())
    }
}
