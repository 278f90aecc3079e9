//! Resilient connections to remote peers
//!
//! [`ConnectionManager`] wraps an unreliable asynchronous [`Binder`] and turns
//! it into a stable handle: bind requests are queued while a connection is in
//! progress, repeated rapid disconnects trip a circuit breaker, and the
//! connection can be re-established automatically.

pub mod binder;
pub mod config;
pub mod error;
pub mod manager;
pub mod state;


pub use binder::{BindEvents, Binder, EventSink};
pub use config::ConnectionConfig;
pub use error::ConnectionError;
pub use manager::{BindResult, ConnectionManager, ListenerId};
pub use state::ConnectionState;
