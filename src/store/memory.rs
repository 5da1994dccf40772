//! In-process KV store for local mode and tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KvStore;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    offline: AtomicBool,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Successful writes so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Reads served so far, hits and misses alike
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        Ok(self
            .entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list() {
        let store = MemoryKvStore::new();
        store.put("ns:agent:b", "{}").await.unwrap();
        store.put("ns:agent:a", "{}").await.unwrap();
        store.put("ns:cert:x", "{}").await.unwrap();
        assert_eq!(store.get("ns:agent:a").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(
            store.list("ns:agent:").await.unwrap(),
            vec!["ns:agent:a".to_string(), "ns:agent:b".to_string()]
        );
        assert_eq!(store.put_count(), 3);
        assert_eq!(store.get_count(), 2);
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let store = MemoryKvStore::new();
        store.set_offline(true);
        assert!(matches!(store.put("k", "v").await, Err(StoreError::Unavailable(_))));
        assert!(store.get("k").await.is_err());
        store.set_offline(false);
        assert!(store.put("k", "v").await.is_ok());
    }
}
