//! Browser UI: a single embedded page plus the JSON/SSE endpoints it calls.

pub mod server;

pub use server::{router, serve, ApiError};
