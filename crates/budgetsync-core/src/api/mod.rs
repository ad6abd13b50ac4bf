//! REST access to the budget backend.
//!
//! `ApiClient` owns the HTTP details (base URL, bearer token, rate-limit
//! backoff, response envelope); `EntityService` layers typed CRUD calls for
//! one entity collection on top and doubles as the fetcher for its store.

pub mod client;
pub mod error;
pub mod service;

pub use client::{ApiClient, ApiResponse};
pub use error::ApiError;
pub use service::{EntityService, ListQuery};
