//! Configuration types for buffer memory regions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{IpcBusError, Result};

/// Where the bytes of a region live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// Process-local heap allocation
    Heap,
    /// File-backed shared memory
    FileBacked,
    /// Anonymous memory file descriptor (Linux-specific)
    #[cfg(target_os = "linux")]
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::Heap
    }
}

impl BackingType {
    /// Check if this backing type is supported on the current platform
    pub fn is_supported(&self) -> bool {
        match self {
            BackingType::Heap | BackingType::FileBacked => true,
            #[cfg(target_os = "linux")]
            BackingType::MemFd => true,
        }
    }

    /// Whether another process can map the region through its descriptor
    pub fn is_shareable(&self) -> bool {
        !matches!(self, BackingType::Heap)
    }

    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::Heap => "heap",
            BackingType::FileBacked => "file-backed",
            #[cfg(target_os = "linux")]
            BackingType::MemFd => "memfd",
        }
    }
}

/// Configuration for creating one mapped region
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Name of the region (memfd name or file name)
    pub name: String,
    /// Total size of the region in bytes
    pub size: usize,
    /// Backing type for the region
    pub backing_type: BackingType,
    /// Optional file path for file-backed regions
    pub file_path: Option<PathBuf>,
    /// Permissions for file-backed regions (Unix permissions)
    pub permissions: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            backing_type: BackingType::FileBacked,
            file_path: None,
            permissions: 0o600,
        }
    }
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed regions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the permissions for the region
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(IpcBusError::invalid_parameter(
                "name",
                "Region name cannot be empty",
            ));
        }

        if self.size == 0 {
            return Err(IpcBusError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }

        if self.backing_type == BackingType::Heap {
            return Err(IpcBusError::invalid_parameter(
                "backing_type",
                "Heap regions are not mapped",
            ));
        }

        if !self.backing_type.is_supported() {
            return Err(IpcBusError::invalid_parameter(
                "backing_type",
                format!(
                    "Backing type {} is not supported on this platform",
                    self.backing_type.name()
                ),
            ));
        }

        Ok(())
    }

    /// Get the file path used for a file-backed region
    pub fn default_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("ipcbus_{}", self.name)))
    }
}
