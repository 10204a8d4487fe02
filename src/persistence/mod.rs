//! Persistence collaborators
//!
//! - `Store`: durable events and strategy counters
//! - `Cache`: last-known-good payloads with TTL

pub mod cache;
pub mod postgres;
pub mod store;

pub use cache::{Cache, CacheConfig, InMemoryCache};
pub use postgres::PostgresStore;
pub use store::{EventQuery, InMemoryStore, Store};
