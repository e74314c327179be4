//! Versioned document store.
//!
//! Everything the service persists is a JSON document at a string path,
//! stamped with a version that increments on every write. Overwrites go
//! through [`DocStore::put_if`], a compare-and-swap on that version; there
//! is no unconditional overwrite, which is what closes the lost-update
//! race on contended poll documents.
//!
//! ## Path layout
//!
//! - `vote:users:{uuid}` — [`crate::models::UserRecord`]
//! - `vote:emails:{email}` — email ownership marker, `{ "user_id": uuid }`
//! - `vote:payments:{uuid}` — [`crate::models::PaymentRecord`]
//! - `vote:polls:{uuid}` — [`crate::models::Poll`]
//! - `vote:sessions:{token}` — [`crate::models::Session`]

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use uuid::Uuid;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

pub const USERS_PREFIX: &str = "vote:users:";
pub const EMAILS_PREFIX: &str = "vote:emails:";
pub const PAYMENTS_PREFIX: &str = "vote:payments:";
pub const POLLS_PREFIX: &str = "vote:polls:";
pub const SESSIONS_PREFIX: &str = "vote:sessions:";

pub fn user_path(id: Uuid) -> String {
    format!("{USERS_PREFIX}{id}")
}

pub fn email_path(email: &str) -> String {
    format!("{EMAILS_PREFIX}{}", email.to_lowercase())
}

pub fn payment_path(id: Uuid) -> String {
    format!("{PAYMENTS_PREFIX}{id}")
}

pub fn poll_path(id: Uuid) -> String {
    format!("{POLLS_PREFIX}{id}")
}

pub fn session_path(token: &str) -> String {
    format!("{SESSIONS_PREFIX}{token}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The document changed under us (put_if) or already exists (insert).
    #[error("Document version conflict")]
    Conflict,

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
pub struct VersionedDoc {
    pub path: String,
    pub value: Value,
    pub version: u64,
}

/// Change feed for one path prefix. Dropping the handle cancels it.
/// The feed is lossy under lag; consumers re-read documents rather than
/// relying on the feed for state.
pub struct Subscription {
    prefix: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(prefix: &str, rx: broadcast::Receiver<String>) -> Self {
        Self {
            prefix: prefix.to_string(),
            rx,
        }
    }

    /// Next changed path under the prefix, or `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(path) if path.starts_with(&self.prefix) => return Some(path),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = String> {
        let prefix = self.prefix;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(path) if path.starts_with(&prefix) => Some(path),
            _ => None,
        })
    }
}

#[async_trait]
pub trait DocStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<VersionedDoc>, StoreError>;

    /// Create a document at a fresh path. `Conflict` if the path exists.
    async fn insert(&self, path: &str, value: Value) -> Result<u64, StoreError>;

    /// Overwrite only if the stored version still equals `expected`.
    /// Returns the new version; `Conflict` if it moved or was removed.
    async fn put_if(&self, path: &str, value: Value, expected: u64) -> Result<u64, StoreError>;

    /// Remove a document. Removing an absent path is not an error.
    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    async fn list(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError>;

    fn subscribe(&self, prefix: &str) -> Subscription;
}
