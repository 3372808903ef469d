//! Persistence boundary for authorization data.
//!
//! The core only ever reads through this trait; admin writes go through it too
//! but always via `AuthzAdmin`, which invalidates the snapshot caches afterwards.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAuthzStore;
pub use postgres::PostgresAuthzStore;
pub use r#trait::{AuthzStore, StoreError};
