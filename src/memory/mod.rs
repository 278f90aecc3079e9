//! Raw memory regions backing shared buffers

pub mod allocator;
pub mod config;
pub mod regions;

pub use allocator::{allocator_for, HeapRegionAllocator, MappedRegionAllocator, RegionAllocator};
pub use config::{BackingType, RegionConfig};
pub use regions::{HeapRegion, MemoryRegion, RegionId, SharedMemoryRegion};
