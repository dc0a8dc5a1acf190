//! In-memory key-value store.

use std::{
    collections::HashMap,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
use wave_reader_core::{KeyValueStore, StorageError};

/// In-memory store.
///
/// Useful for tests and the simulator. Data is lost on restart. Failures
/// can be injected to exercise best-effort persistence.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
    failing_sets: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value.
    #[must_use]
    pub fn with_value(self, key: &str, value: Value) -> Self {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        self
    }

    /// Stored value, bypassing failure injection.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_sets(&self, count: u32) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    /// Make every read and write fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.check_available()?;
        Ok(self
            .values
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check_available()?;
        let failing = self
            .failing_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StorageError::Unavailable("write rejected".to_string()));
        }

        self.values
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }
}
