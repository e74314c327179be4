//! In-process store backend.
//!
//! Same CAS semantics as the Redis backend, over a `RwLock<HashMap>`.
//! Selected with `VOTE_STORE=memory`; also the backend the integration
//! tests run against.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{DocStore, StoreError, Subscription, VersionedDoc};

const CHANGE_FEED_CAPACITY: usize = 256;

pub struct MemoryStore {
    docs: RwLock<HashMap<String, (Value, u64)>>,
    notify: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            docs: RwLock::new(HashMap::new()),
            notify,
        }
    }

    fn publish(&self, path: &str) {
        // No receivers is fine.
        let _ = self.notify.send(path.to_string());
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Backend("memory store lock poisoned".to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<VersionedDoc>, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::lock_poisoned())?;
        Ok(docs.get(path).map(|(value, version)| VersionedDoc {
            path: path.to_string(),
            value: value.clone(),
            version: *version,
        }))
    }

    async fn insert(&self, path: &str, value: Value) -> Result<u64, StoreError> {
        {
            let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
            if docs.contains_key(path) {
                return Err(StoreError::Conflict);
            }
            docs.insert(path.to_string(), (value, 1));
        }
        self.publish(path);
        Ok(1)
    }

    async fn put_if(&self, path: &str, value: Value, expected: u64) -> Result<u64, StoreError> {
        let next = {
            let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
            match docs.get_mut(path) {
                Some((stored, version)) if *version == expected => {
                    *stored = value;
                    *version += 1;
                    *version
                }
                _ => return Err(StoreError::Conflict),
            }
        };
        self.publish(path);
        Ok(next)
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let removed = {
            let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
            docs.remove(path).is_some()
        };
        if removed {
            self.publish(path);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::lock_poisoned())?;
        let mut out: Vec<VersionedDoc> = docs
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, (value, version))| VersionedDoc {
                path: path.clone(),
                value: value.clone(),
                version: *version,
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        Subscription::new(prefix, self.notify.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_insert_then_get() {
        let store = MemoryStore::new();
        let version = store.insert("vote:polls:x", json!({"a": 1})).await.unwrap();
        assert_eq!(version, 1);

        let doc = store.get("vote:polls:x").await.unwrap().unwrap();
        assert_eq!(doc.value, json!({"a": 1}));
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn test_insert_conflicts_on_existing_path() {
        let store = MemoryStore::new();
        store.insert("p", json!(1)).await.unwrap();
        assert!(matches!(
            store.insert("p", json!(2)).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    async fn test_put_if_moves_version_forward() {
        let store = MemoryStore::new();
        store.insert("p", json!(1)).await.unwrap();

        let v2 = store.put_if("p", json!(2), 1).await.unwrap();
        assert_eq!(v2, 2);

        // Stale writer loses.
        assert!(matches!(
            store.put_if("p", json!(3), 1).await,
            Err(StoreError::Conflict)
        ));
        assert_eq!(store.get("p").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_put_if_on_missing_path_conflicts() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put_if("gone", json!(1), 1).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemoryStore::new();
        store.insert("p", json!(1)).await.unwrap();
        store.remove("p").await.unwrap();
        store.remove("p").await.unwrap();
        assert!(store.get("p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = MemoryStore::new();
        store.insert("vote:polls:a", json!(1)).await.unwrap();
        store.insert("vote:polls:b", json!(2)).await.unwrap();
        store.insert("vote:users:c", json!(3)).await.unwrap();

        let polls = store.list("vote:polls:").await.unwrap();
        assert_eq!(polls.len(), 2);
        assert_eq!(polls[0].path, "vote:polls:a");
    }

    #[tokio::test]
    async fn test_subscription_sees_prefixed_writes_only() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("vote:polls:");

        store.insert("vote:users:u", json!(1)).await.unwrap();
        store.insert("vote:polls:p", json!(1)).await.unwrap();

        assert_eq!(sub.changed().await.as_deref(), Some("vote:polls:p"));
    }
}
