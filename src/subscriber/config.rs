//! Subscriber configuration

use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_QUEUE_CAPACITY, SHARED_QUEUE_CAPACITY},
    error::{IpcBusError, Result},
};

/// Configuration for one subscriber endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Name used in logs; named subscribers also log their drop ratio
    pub name: Option<String>,
    /// Capacity of the dispatch queue
    pub queue_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            name: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SubscriberConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for a shared-buffer subscriber: only the latest frame is kept
    pub fn shared_buffer() -> Self {
        Self {
            queue_capacity: SHARED_QUEUE_CAPACITY,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(IpcBusError::invalid_parameter(
                "queue_capacity",
                "Queue capacity must be greater than 0",
            ));
        }
        if matches!(&self.name, Some(name) if name.is_empty()) {
            return Err(IpcBusError::invalid_parameter(
                "name",
                "Subscriber name cannot be empty",
            ));
        }
        Ok(())
    }

    /// Label used in log lines
    pub(crate) fn label(&self, type_name: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("subscriber<{}>", type_name),
        }
    }
}
