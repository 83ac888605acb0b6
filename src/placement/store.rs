use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::{FleetError, Result};

/// Change notification emitted by a [`CoordinationStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
        }
    }
}

/// Fleet-wide key/value store with prefix watches.
///
/// Implementations surface connectivity problems as
/// [`FleetError::CoordinationService`]; they never retry internally.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    async fn watch(&self, prefix: &str) -> Result<StoreWatch>;
}

/// Stream of changes under one key prefix.
pub struct StoreWatch {
    prefix: String,
    rx: broadcast::Receiver<WatchEvent>,
}

impl StoreWatch {
    pub fn new(prefix: impl Into<String>, rx: broadcast::Receiver<WatchEvent>) -> Self {
        Self {
            prefix: prefix.into(),
            rx,
        }
    }

    /// Next event under the watched prefix, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key().starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(prefix = %self.prefix, skipped, "Watch lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Process-local [`CoordinationStore`].
///
/// Serves single-host deployments and tests. Can be switched offline to
/// exercise connectivity-loss handling.
pub struct InMemoryCoordinationStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<WatchEvent>,
    available: AtomicBool,
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FleetError::CoordinationService(
                "coordination store unavailable".into(),
            ))
        }
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_available()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        self.publish(WatchEvent::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        let existed = self.entries.write().await.remove(key).is_some();
        if existed {
            self.publish(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.ensure_available()?;
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<StoreWatch> {
        self.ensure_available()?;
        Ok(StoreWatch::new(prefix, self.events.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryCoordinationStore::new();
        store.put("a/1", b"one".to_vec()).await.unwrap();
        assert_eq!(store.get("a/1").await.unwrap(), Some(b"one".to_vec()));

        assert!(store.delete("a/1").await.unwrap());
        assert!(!store.delete("a/1").await.unwrap());
        assert_eq!(store.get("a/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_is_prefix_scoped() {
        let store = InMemoryCoordinationStore::new();
        store.put("jobs/a/h:1", vec![]).await.unwrap();
        store.put("jobs/ab/h:1", vec![]).await.unwrap();
        store.put("hosts/h:1", vec![]).await.unwrap();

        let keys: Vec<String> = store
            .list("jobs/a/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["jobs/a/h:1"]);
        assert_eq!(store.list("jobs/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryCoordinationStore::new();
        store.set_available(false);

        assert!(matches!(
            store.get("k").await,
            Err(FleetError::CoordinationService(_))
        ));
        assert!(store.put("k", vec![]).await.is_err());
        assert!(store.list("").await.is_err());

        store.set_available(true);
        assert!(store.put("k", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn watch_filters_by_prefix() {
        let store = InMemoryCoordinationStore::new();
        let mut watch = store.watch("jobs/").await.unwrap();

        store.put("hosts/h:1", vec![]).await.unwrap();
        store.put("jobs/a/h:1", b"x".to_vec()).await.unwrap();
        store.delete("jobs/a/h:1").await.unwrap();

        assert_eq!(
            watch.next().await,
            Some(WatchEvent::Put {
                key: "jobs/a/h:1".into(),
                value: b"x".to_vec()
            })
        );
        assert_eq!(
            watch.next().await,
            Some(WatchEvent::Delete {
                key: "jobs/a/h:1".into()
            })
        );
    }
}
