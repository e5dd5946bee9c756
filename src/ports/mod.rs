//! # Ports Module
//!
//! Port interfaces between the search core and the surfaces built on it.
//! Surfaces depend only on these traits, never on the concrete adapters,
//! which keeps them testable against in-memory implementations.

pub mod search_service;

pub use search_service::SearchServicePort;
