//! Health check endpoints.

pub mod ping;
