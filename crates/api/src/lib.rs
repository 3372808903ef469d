//! HTTP API: the authorization gate, the admin surface and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
