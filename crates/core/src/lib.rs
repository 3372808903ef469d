//! `gatehouse-core` — shared building blocks for the authorization core.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Entity, Retirable, active};
pub use error::{DomainError, DomainResult};
pub use id::{PermissionKeyId, RoleId, RuleId, UserId};
