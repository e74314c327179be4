//! Redis store backend.
//!
//! One Redis hash per document: `data` holds the JSON blob, `v` the
//! version stamp. Both conditional writes run as Lua scripts so the
//! version check and the write land in one server-side step — no
//! read-then-write window for a concurrent vote to slip through.

use std::time::Duration;

use async_trait::async_trait;
use redis::{
    Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{DocStore, StoreError, Subscription, VersionedDoc};

const CHANGE_FEED_CAPACITY: usize = 256;

const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return -1
end
redis.call('HSET', KEYS[1], 'data', ARGV[1], 'v', 1)
return 1
"#;

const PUT_IF_SCRIPT: &str = r#"
local v = redis.call('HGET', KEYS[1], 'v')
if not v then
  return -1
end
if tonumber(v) ~= tonumber(ARGV[2]) then
  return -2
end
local next = tonumber(v) + 1
redis.call('HSET', KEYS[1], 'data', ARGV[1], 'v', next)
return next
"#;

pub struct RedisStore {
    connection: ConnectionManager,
    insert_script: Script,
    put_if_script: Script,
    notify: broadcast::Sender<String>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Self {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(100));

        let client = Client::open(redis_url).unwrap();
        let connection = client
            .get_connection_manager_with_config(config)
            .await
            .unwrap();

        let (notify, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        Self {
            connection,
            insert_script: Script::new(INSERT_SCRIPT),
            put_if_script: Script::new(PUT_IF_SCRIPT),
            notify,
        }
    }

    fn publish(&self, path: &str) {
        let _ = self.notify.send(path.to_string());
    }

    async fn read_doc(
        &self,
        connection: &mut ConnectionManager,
        path: &str,
    ) -> Result<Option<VersionedDoc>, StoreError> {
        let (data, version): (Option<String>, Option<u64>) = redis::cmd("HMGET")
            .arg(path)
            .arg("data")
            .arg("v")
            .query_async(connection)
            .await
            .map_err(backend)?;

        match (data, version) {
            (Some(data), Some(version)) => {
                let value = serde_json::from_str(&data)
                    .map_err(|e| StoreError::Backend(format!("corrupt document at {path}: {e}")))?;
                Ok(Some(VersionedDoc {
                    path: path.to_string(),
                    value,
                    version,
                }))
            }
            _ => Ok(None),
        }
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl DocStore for RedisStore {
    async fn get(&self, path: &str) -> Result<Option<VersionedDoc>, StoreError> {
        let mut connection = self.connection.clone();
        self.read_doc(&mut connection, path).await
    }

    async fn insert(&self, path: &str, value: Value) -> Result<u64, StoreError> {
        let mut connection = self.connection.clone();
        let outcome: i64 = self
            .insert_script
            .key(path)
            .arg(value.to_string())
            .invoke_async(&mut connection)
            .await
            .map_err(backend)?;

        if outcome < 0 {
            return Err(StoreError::Conflict);
        }
        self.publish(path);
        Ok(outcome as u64)
    }

    async fn put_if(&self, path: &str, value: Value, expected: u64) -> Result<u64, StoreError> {
        let mut connection = self.connection.clone();
        let outcome: i64 = self
            .put_if_script
            .key(path)
            .arg(value.to_string())
            .arg(expected)
            .invoke_async(&mut connection)
            .await
            .map_err(backend)?;

        if outcome < 0 {
            return Err(StoreError::Conflict);
        }
        self.publish(path);
        Ok(outcome as u64)
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(path)
            .query_async(&mut connection)
            .await
            .map_err(backend)?;

        if removed > 0 {
            self.publish(path);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError> {
        let mut connection = self.connection.clone();
        let pattern = format!("{prefix}*");
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut connection)
                .await
                .map_err(backend)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.read_doc(&mut connection, &key).await? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn subscribe(&self, prefix: &str) -> Subscription {
        Subscription::new(prefix, self.notify.subscribe())
    }
}
