//! # Notegraph Server
//!
//! HTTP surface over [`notegraph_core`]: note capture, graph inspection,
//! tag management, hybrid search, and SSE synthesis streaming. The router
//! is exposed as a library so integration tests can drive it in-process.

pub mod api;

pub use api::{build_router, AppState};
