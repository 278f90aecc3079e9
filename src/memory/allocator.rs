//! Region allocators used by buffer pools

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::error::{IpcBusError, Result};

use super::{
    config::{BackingType, RegionConfig},
    regions::{HeapRegion, MemoryRegion, RegionId, SharedMemoryRegion},
};

/// Allocation primitive for fixed-size regions
pub trait RegionAllocator: Send + Sync + fmt::Debug {
    /// Allocate a zeroed region of `size` bytes
    fn allocate(&self, size: usize) -> Result<Arc<dyn MemoryRegion>>;

    /// Give a region back; its memory is freed once the last reference drops
    fn release(&self, region: Arc<dyn MemoryRegion>) -> Result<()>;

    /// Backing type of the regions this allocator produces
    fn backing_type(&self) -> BackingType;
}

/// Allocates process-local heap regions
#[derive(Debug, Default)]
pub struct HeapRegionAllocator;

impl HeapRegionAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl RegionAllocator for HeapRegionAllocator {
    fn allocate(&self, size: usize) -> Result<Arc<dyn MemoryRegion>> {
        Ok(Arc::new(HeapRegion::new(size)?))
    }

    fn release(&self, _region: Arc<dyn MemoryRegion>) -> Result<()> {
        Ok(())
    }

    fn backing_type(&self) -> BackingType {
        BackingType::Heap
    }
}

/// Allocates memfd or file-backed regions that can be mapped by other processes
#[derive(Debug)]
pub struct MappedRegionAllocator {
    backing_type: BackingType,
    prefix: String,
    directory: Option<PathBuf>,
    /// Files to unlink when their region is released
    files: Mutex<HashMap<RegionId, PathBuf>>,
}

impl MappedRegionAllocator {
    /// Create an allocator naming its regions `<prefix>_<n>`
    pub fn new(backing_type: BackingType, prefix: impl Into<String>) -> Result<Self> {
        if !backing_type.is_shareable() || !backing_type.is_supported() {
            return Err(IpcBusError::invalid_parameter(
                "backing_type",
                format!("{} regions cannot be mapped", backing_type.name()),
            ));
        }
        Ok(Self {
            backing_type,
            prefix: prefix.into(),
            directory: None,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Place file-backed regions in `directory` instead of the temp dir
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    fn region_config(&self, size: usize) -> RegionConfig {
        let name = format!("{}_{}_{}", self.prefix, std::process::id(), unique_suffix());
        let mut config = RegionConfig::new(name.clone(), size).with_backing_type(self.backing_type);
        if let Some(directory) = &self.directory {
            config = config.with_file_path(directory.join(name));
        }
        config
    }
}

impl RegionAllocator for MappedRegionAllocator {
    fn allocate(&self, size: usize) -> Result<Arc<dyn MemoryRegion>> {
        let region = SharedMemoryRegion::new(self.region_config(size))?;
        if let Some(path) = region.path() {
            let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
            files.insert(region.id(), path.clone());
        }
        Ok(Arc::new(region))
    }

    fn release(&self, region: Arc<dyn MemoryRegion>) -> Result<()> {
        let path = {
            let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
            files.remove(&region.id())
        };
        drop(region);

        if let Some(path) = path {
            std::fs::remove_file(&path)
                .map_err(|e| IpcBusError::from_io(e, "Failed to remove backing file"))?;
        }
        Ok(())
    }

    fn backing_type(&self) -> BackingType {
        self.backing_type
    }
}

fn unique_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Build the allocator matching a backing type
pub fn allocator_for(backing_type: BackingType, prefix: &str) -> Result<Arc<dyn RegionAllocator>> {
    match backing_type {
        BackingType::Heap => Ok(Arc::new(HeapRegionAllocator::new())),
        other => Ok(Arc::new(MappedRegionAllocator::new(other, prefix)?)),
    }
}
