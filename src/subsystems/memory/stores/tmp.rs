//! `tmp` store: ephemeral in-memory record store.
//!
//! All data lives in process memory and is discarded when the process exits.
//! Used by default and in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppError;
use crate::subsystems::memory::{MemoryRecord, MemoryStore, matches_forget, rank};

/// Ephemeral in-memory store.
pub struct TmpStore {
    /// namespace -> records in arrival order
    data: Mutex<HashMap<String, Vec<MemoryRecord>>>,
}

impl TmpStore {
    pub fn new() -> Self {
        Self { data: Mutex::new(HashMap::new()) }
    }
}

impl Default for TmpStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore for TmpStore {
    fn store_type(&self) -> &str {
        "tmp"
    }

    fn remember(&self, namespace: &str, record: &MemoryRecord) -> Result<(), AppError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| AppError::Memory("tmp store lock poisoned".into()))?;
        data.entry(namespace.to_string()).or_default().push(record.clone());
        Ok(())
    }

    fn recall(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, AppError> {
        let data = self
            .data
            .lock()
            .map_err(|_| AppError::Memory("tmp store lock poisoned".into()))?;
        Ok(data.get(namespace).map(|r| rank(r, query, limit)).unwrap_or_default())
    }

    fn forget(&self, namespace: &str, query: &str) -> Result<usize, AppError> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| AppError::Memory("tmp store lock poisoned".into()))?;
        Ok(data
            .get_mut(namespace)
            .map(|records| {
                let before = records.len();
                records.retain(|r| !matches_forget(r, query));
                before - records.len()
            })
            .unwrap_or(0))
    }
}
