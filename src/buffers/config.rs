//! Buffer pool configuration

use serde::{Deserialize, Serialize};

use crate::{
    error::{IpcBusError, Result},
    memory::BackingType,
};

/// Configuration for buffer pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Name of the buffer pool
    pub name: String,
    /// Number of buffers, fixed for the lifetime of the pool
    pub num_buffers: usize,
    /// Size of each buffer in bytes
    pub buffer_size: usize,
    /// Where buffer memory comes from
    pub backing: BackingType,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            num_buffers: 4,
            buffer_size: 4096,
            backing: BackingType::default(),
        }
    }
}

impl BufferPoolConfig {
    /// Create a new configuration with custom name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set buffer count
    pub fn with_num_buffers(mut self, count: usize) -> Self {
        self.num_buffers = count;
        self
    }

    /// Set buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set backing type
    pub fn with_backing(mut self, backing: BackingType) -> Self {
        self.backing = backing;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(IpcBusError::invalid_parameter(
                "name",
                "Pool name cannot be empty",
            ));
        }

        if self.num_buffers == 0 {
            return Err(IpcBusError::invalid_parameter(
                "num_buffers",
                "Buffer count must be greater than 0",
            ));
        }

        if self.buffer_size == 0 {
            return Err(IpcBusError::invalid_parameter(
                "buffer_size",
                "Buffer size must be greater than 0",
            ));
        }

        if !self.backing.is_supported() {
            return Err(IpcBusError::invalid_parameter(
                "backing",
                format!("Backing type {} is not supported", self.backing.name()),
            ));
        }

        Ok(())
    }

    /// Calculate total memory required
    pub fn total_memory_required(&self) -> usize {
        self.buffer_size.saturating_mul(self.num_buffers)
    }
}

/// Builder pattern for buffer pool configuration
pub struct BufferPoolConfigBuilder {
    config: BufferPoolConfig,
}

impl BufferPoolConfigBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: BufferPoolConfig::new(name),
        }
    }

    pub fn num_buffers(mut self, count: usize) -> Self {
        self.config.num_buffers = count;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn backing(mut self, backing: BackingType) -> Self {
        self.config.backing = backing;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<BufferPoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
