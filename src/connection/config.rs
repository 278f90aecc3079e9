//! Connection manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    config::{MAX_RAPID_DISCONNECTS, RAPID_DISCONNECT_WINDOW},
    error::{IpcBusError, Result},
};

/// Configuration for one connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Opaque address passed to the binder
    pub target: String,
    /// Consecutive rapid disconnects that trip the circuit breaker
    pub max_rapid_disconnects: u32,
    /// A disconnect this soon after connecting counts as rapid
    pub rapid_disconnect_window: Duration,
    /// Rebind after every disconnect unless the breaker tripped
    pub auto_reconnect: bool,
    /// Delay before an automatic rebind
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            max_rapid_disconnects: MAX_RAPID_DISCONNECTS,
            rapid_disconnect_window: RAPID_DISCONNECT_WINDOW,
            auto_reconnect: false,
            reconnect_delay: Duration::ZERO,
        }
    }
}

impl ConnectionConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_max_rapid_disconnects(mut self, max: u32) -> Self {
        self.max_rapid_disconnects = max;
        self
    }

    pub fn with_rapid_disconnect_window(mut self, window: Duration) -> Self {
        self.rapid_disconnect_window = window;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(IpcBusError::invalid_parameter(
                "target",
                "Connection target cannot be empty",
            ));
        }

        if self.max_rapid_disconnects == 0 {
            return Err(IpcBusError::invalid_parameter(
                "max_rapid_disconnects",
                "Disconnect threshold must be greater than 0",
            ));
        }

        if self.rapid_disconnect_window.is_zero() {
            return Err(IpcBusError::invalid_parameter(
                "rapid_disconnect_window",
                "Disconnect window must be greater than 0",
            ));
        }

        Ok(())
    }
}
