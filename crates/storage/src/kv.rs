use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use super::error::StorageResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// String key-value substrate that conversation history is persisted into.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>>;
    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>>;
    /// Removing a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>>;
}

/// Process-local store; history is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.entries.write().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.entries.write().await.remove(key);
            Ok(())
        })
    }
}
