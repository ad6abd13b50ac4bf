//! budgetsync-core - Client-side data synchronization for Budget-Buddy.
//!
//! Provides lazily fetched, shareable caches over the backend's entity
//! collections, market-aware TTL policies for quote data, and the HTTP
//! services that feed them. This crate is UI-agnostic.

pub mod api;
pub mod areas;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod ttl;

pub use api::{ApiClient, ApiError, EntityService, ListQuery};
pub use areas::{EntityArea, FinanceStores};
pub use config::SyncConfig;
pub use error::{FetchError, RegistryError};
pub use store::{CachedCollection, Fetcher, Status, Store, StoreRegistry, StoreView};
pub use ttl::{PolicyParseError, TtlDecision, TtlPolicy};
