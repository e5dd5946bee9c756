//! # Repositories
//!
//! In-process storage behind the search engine:
//! - [`BoundedCache`]: size-bounded, time-expiring key/value store
//! - [`CacheLayer`]: the search-result, detail and token tiers built on it
//! - [`BookmarkRepository`]: per-user bookmarks consulted by detail views

pub mod bookmark;
pub mod cache;
pub mod tiers;

pub use bookmark::{BookmarkRepository, InMemoryBookmarkRepository};
pub use cache::{BoundedCache, CacheEntry, CacheStats, RemovalCause, RemovalNotice};
pub use tiers::{CacheLayer, CacheTier, SearchCacheKey, TierStats};
