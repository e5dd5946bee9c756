//! Per-user bookmarks used to stamp detail views.

use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Storage for user bookmarks on record ids
#[async_trait]
pub trait BookmarkRepository: Send + Sync + std::fmt::Debug {
    async fn is_bookmarked(&self, user: &str, record_id: &str) -> Result<bool>;

    /// Returns `true` if the bookmark was newly added
    async fn add(&self, user: &str, record_id: &str) -> Result<bool>;

    /// Returns `true` if a bookmark was removed
    async fn remove(&self, user: &str, record_id: &str) -> Result<bool>;

    /// Record ids bookmarked by `user`, sorted
    async fn list(&self, user: &str) -> Result<Vec<String>>;
}

/// In-memory bookmark store
#[derive(Debug, Default)]
pub struct InMemoryBookmarkRepository {
    bookmarks: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryBookmarkRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookmarkRepository for InMemoryBookmarkRepository {
    async fn is_bookmarked(&self, user: &str, record_id: &str) -> Result<bool> {
        let bookmarks = self.bookmarks.read().await;
        Ok(bookmarks
            .get(user)
            .is_some_and(|ids| ids.contains(record_id)))
    }

    async fn add(&self, user: &str, record_id: &str) -> Result<bool> {
        let mut bookmarks = self.bookmarks.write().await;
        let added = bookmarks
            .entry(user.to_string())
            .or_default()
            .insert(record_id.to_string());
        if added {
            debug!("User {} bookmarked {}", user, record_id);
        }
        Ok(added)
    }

    async fn remove(&self, user: &str, record_id: &str) -> Result<bool> {
        let mut bookmarks = self.bookmarks.write().await;
        let Some(ids) = bookmarks.get_mut(user) else {
            return Ok(false);
        };
        let removed = ids.remove(record_id);
        if ids.is_empty() {
            bookmarks.remove(user);
        }
        Ok(removed)
    }

    async fn list(&self, user: &str) -> Result<Vec<String>> {
        let bookmarks = self.bookmarks.read().await;
        Ok(bookmarks
            .get(user)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }
}
