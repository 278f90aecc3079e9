//! Connection states

use std::fmt;

/// Lifecycle of a managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No bind requested, or explicitly unbound
    Unbound,
    /// Bind issued, waiting for the peer
    Binding,
    /// Peer reachable through the cached handle
    Bound,
    /// Peer lost; may rebind
    Disconnected,
    /// Circuit breaker tripped; terminal until reset
    Refused,
}

impl ConnectionState {
    pub fn is_bound(&self) -> bool {
        matches!(self, ConnectionState::Bound)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Unbound => "unbound",
            ConnectionState::Binding => "binding",
            ConnectionState::Bound => "bound",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Refused => "refused",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
