//! Connection error types

/// Errors reported to bind listeners and blocking callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Too many rapid disconnects; no bind is attempted until `reset`
    #[error("Too many rapid disconnects, refusing to bind")]
    Refused,

    /// A blocking bind was requested from the thread that delivers bind events
    #[error("Blocking bind on the event thread would deadlock")]
    WouldDeadlock,

    /// The bind primitive reported a failure
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// The connection was unbound while the request was pending
    #[error("Connection unbound")]
    Unbound,

    /// No bind outcome arrived in time
    #[error("Timed out waiting for bind")]
    Timeout,

    /// A remote call failed even after rebinding once
    #[error("Remote call failed: {0}")]
    CallFailed(String),
}
