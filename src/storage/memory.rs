use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Backend, Mutation, StoreResult, Updater};

/// Process-local backend. Nothing survives a restart.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn update(&self, key: &str, updater: &mut Updater<'_>) -> StoreResult<()> {
        // The write guard is held across read, updater and write.
        let mut data = self.data.write().await;
        match updater(data.get(key).cloned()) {
            Mutation::Put(value) => {
                data.insert(key.to_string(), value);
            }
            Mutation::Remove => {
                data.remove(key);
            }
            Mutation::Keep => {}
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }
}
