//! Memory region implementations

use std::{
    fmt,
    fs::{File, OpenOptions},
    os::fd::{AsRawFd, RawFd},
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
    ptr,
    sync::atomic::{AtomicU64, Ordering},
};

#[cfg(target_os = "linux")]
use std::ffi::CString;

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

use crate::error::{IpcBusError, Result};

use super::config::{BackingType, RegionConfig};

/// Identifier of a region, unique within the process
pub type RegionId = u64;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out the next region id
pub(crate) fn next_region_id() -> RegionId {
    NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A fixed-size block of raw memory
///
/// Regions never move or resize once created. Synchronizing writers with
/// readers is the caller's job; buffers get it from pool checkout.
pub trait MemoryRegion: Send + Sync + fmt::Debug {
    /// Unique id of the region
    fn id(&self) -> RegionId;

    /// Size in bytes
    fn size(&self) -> usize;

    /// Backing type of the region
    fn backing_type(&self) -> BackingType;

    /// Pointer to the first byte
    fn as_ptr(&self) -> *const u8;

    /// Mutable pointer to the first byte
    ///
    /// # Safety
    /// Caller must ensure exclusive access to the bytes it writes
    unsafe fn as_mut_ptr(&self) -> *mut u8;

    /// Descriptor another process can map, if any
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Region allocated on the process heap
pub struct HeapRegion {
    id: RegionId,
    /// Start of a leaked `Box<[u8]>` of `size` bytes, reclaimed on drop
    ptr: *mut u8,
    size: usize,
}

impl HeapRegion {
    /// Allocate a zeroed region
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(IpcBusError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }
        let data = vec![0u8; size].into_boxed_slice();
        Ok(Self {
            id: next_region_id(),
            ptr: Box::into_raw(data) as *mut u8,
            size,
        })
    }
}

impl MemoryRegion for HeapRegion {
    fn id(&self) -> RegionId {
        self.id
    }

    fn size(&self) -> usize {
        self.size
    }

    fn backing_type(&self) -> BackingType {
        BackingType::Heap
    }

    fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    unsafe fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `size` come from `Box::into_raw` in `new`
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, self.size)));
        }
    }
}

impl fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapRegion")
            .field("id", &self.id)
            .field("size", &self.size())
            .finish()
    }
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

/// A memory-mapped region backed by a file or a memfd
#[derive(Debug)]
pub struct SharedMemoryRegion {
    id: RegionId,
    name: String,
    size: usize,
    backing_type: BackingType,
    /// Memory-mapped region
    mmap: MmapMut,
    /// Start of the mapping, taken once from `mmap` for writers
    ptr: *mut u8,
    /// Keeps the descriptor open for the lifetime of the mapping
    file: File,
    /// Path of the backing file, `None` for memfd regions
    path: Option<PathBuf>,
}

impl SharedMemoryRegion {
    /// Create a new mapped region
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let (file, path) = Self::create_backing(&config)?;

        // SAFETY: the file was just sized to `config.size` and stays open as
        // long as the mapping lives
        let mut mmap = unsafe {
            MmapOptions::new()
                .len(config.size)
                .map_mut(&file)
                .map_err(|e| IpcBusError::from_io(e, "Failed to create memory mapping"))?
        };

        Ok(Self {
            id: next_region_id(),
            name: config.name,
            size: config.size,
            backing_type: config.backing_type,
            ptr: mmap.as_mut_ptr(),
            mmap,
            file,
            path,
        })
    }

    /// Create the backing storage for the region
    fn create_backing(config: &RegionConfig) -> Result<(File, Option<PathBuf>)> {
        match config.backing_type {
            BackingType::FileBacked => Self::create_file_backing(config),
            #[cfg(target_os = "linux")]
            BackingType::MemFd => Self::create_memfd_backing(config),
            BackingType::Heap => Err(IpcBusError::invalid_parameter(
                "backing_type",
                "Heap regions are not mapped",
            )),
        }
    }

    /// Create file-backed storage
    fn create_file_backing(config: &RegionConfig) -> Result<(File, Option<PathBuf>)> {
        let path = config.default_file_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| IpcBusError::from_io(e, "Failed to create backing file"))?;

        file.set_len(config.size as u64)
            .map_err(|e| IpcBusError::from_io(e, "Failed to set file size"))?;

        Ok((file, Some(path)))
    }

    /// Create memfd-backed storage
    #[cfg(target_os = "linux")]
    fn create_memfd_backing(config: &RegionConfig) -> Result<(File, Option<PathBuf>)> {
        let name_cstr = CString::new(config.name.clone())
            .map_err(|_| IpcBusError::invalid_parameter("name", "Name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| IpcBusError::platform(format!("Failed to create memfd: {}", e)))?;

        let file = File::from(owned_fd);
        file.set_len(config.size as u64)
            .map_err(|e| IpcBusError::from_io(e, "Failed to set memfd size"))?;

        Ok((file, None))
    }

    /// Get the name of the region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Flush changes to the backing file
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| IpcBusError::from_io(e, "Failed to flush memory mapping"))
    }
}

impl MemoryRegion for SharedMemoryRegion {
    fn id(&self) -> RegionId {
        self.id
    }

    fn size(&self) -> usize {
        self.size
    }

    fn backing_type(&self) -> BackingType {
        self.backing_type
    }

    fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    unsafe fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

unsafe impl Send for SharedMemoryRegion {}
unsafe impl Sync for SharedMemoryRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_region_roundtrip() {
        let region = HeapRegion::new(32).unwrap();
        assert_eq!(region.size(), 32);
        assert_eq!(region.backing_type(), BackingType::Heap);
        assert!(region.raw_fd().is_none());

        unsafe {
            let dst = region.as_mut_ptr();
            ptr::copy_nonoverlapping(b"odom".as_ptr(), dst.add(8), 4);
        }
        let mut out = [0u8; 4];
        unsafe { ptr::copy_nonoverlapping(region.as_ptr().add(8), out.as_mut_ptr(), 4) };
        assert_eq!(&out, b"odom");
    }

    #[test]
    fn test_heap_region_rejects_zero_size() {
        assert!(HeapRegion::new(0).is_err());
    }

    #[test]
    fn test_region_ids_are_unique() {
        let a = HeapRegion::new(8).unwrap();
        let b = HeapRegion::new(8).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memfd_region_writes_are_visible() {
        let region = SharedMemoryRegion::new(
            RegionConfig::new("regions-test", 4096).with_backing_type(BackingType::MemFd),
        )
        .unwrap();
        assert!(region.raw_fd().is_some());
        assert!(region.path().is_none());

        unsafe { *region.as_mut_ptr().add(100) = 7 };
        assert_eq!(unsafe { *region.as_ptr().add(100) }, 7);
    }
}
