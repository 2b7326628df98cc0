//! Network layer.
//!
//! # Data Flow
//! ```text
//! listener.rs (bind, bounded accept)
//!     → TcpStream + peer address + connection permit
//!     → http::server (protocol detection and serving)
//! ```

pub mod listener;

pub use listener::{ConnectionPermit, Listener, ListenerError};
