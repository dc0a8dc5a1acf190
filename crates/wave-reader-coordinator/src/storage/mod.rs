//! Durable keys and the store implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use wave_reader_core::{KeyValueStore, StorageError};

pub const SETTINGS_KEY: &str = "settings";
pub const SELECTORS_KEY: &str = "selectors";
pub const CURRENT_SELECTOR_KEY: &str = "currentSelector";

/// Read and decode `key`. Absent keys and explicit nulls yield `None`.
///
/// # Errors
/// Returns error if the store fails or the stored value does not decode.
pub async fn load<K, T>(store: &K, key: &str) -> Result<Option<T>, StorageError>
where
    K: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get(key).await? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|source| {
            StorageError::Malformed {
                key: key.to_string(),
                source,
            }
        }),
    }
}
