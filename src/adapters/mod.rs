//! # Adapters Module
//!
//! Concrete implementations of the port interfaces defined in [`crate::ports`].
//! Surfaces hold an `Arc<dyn SearchServicePort>` and never see the provider
//! adapters, orchestrator or cache tiers behind it.

pub mod unified_search;

pub use unified_search::UnifiedSearchService;
