//! Shared buffer handles handed out by a pool

use std::{fmt, os::fd::RawFd, ptr, slice, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::{IpcBusError, Result},
    memory::MemoryRegion,
};

/// Identifier of a shared buffer, unique for the lifetime of its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(u64);

impl BufferId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exclusive, writable handle on a checked out buffer
///
/// Obtained from [`BufferPool::checkout`](super::BufferPool::checkout).
/// Dropping the handle does not return the buffer; either publish it through
/// a shared-buffer channel or hand it back with `BufferPool::release`.
///
/// Bytes are only ever copied in and out. Subscribers may still be reading a
/// region that timed out and went back to the pool, so no reference into it
/// is handed out.
pub struct SharedBuffer {
    id: BufferId,
    region: Arc<dyn MemoryRegion>,
}

impl SharedBuffer {
    pub(crate) fn new(id: BufferId, region: Arc<dyn MemoryRegion>) -> Self {
        Self { id, region }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Write data to the buffer at the specified offset
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.capacity())?;
        // SAFETY: range checked above; the source is a caller-owned slice and
        // never overlaps a pool region
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.region.as_mut_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`
    pub fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        copy_out(self.region.as_ref(), offset, out)
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(offset, &mut out)?;
        Ok(out)
    }

    /// Zero the whole buffer
    pub fn clear(&mut self) {
        // SAFETY: writes exactly the region's bytes
        unsafe { ptr::write_bytes(self.region.as_mut_ptr(), 0, self.capacity()) }
    }

    /// Descriptor of the backing region, if it can be mapped by another process
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.region.raw_fd()
    }

    /// Read-only view handed to subscribers when the buffer is published
    pub(crate) fn view(&self) -> BufferView {
        BufferView {
            id: self.id,
            region: Arc::clone(&self.region),
        }
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Read-only view of a published buffer
///
/// Valid until the holder acknowledges the frame it came with; the bytes may
/// be overwritten by the next publisher afterwards.
#[derive(Clone)]
pub struct BufferView {
    id: BufferId,
    region: Arc<dyn MemoryRegion>,
}

impl BufferView {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`
    pub fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        copy_out(self.region.as_ref(), offset, out)
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(offset, &mut out)?;
        Ok(out)
    }

    /// Copy the whole buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.capacity()];
        // SAFETY: `out` has exactly the region's length
        unsafe { ptr::copy_nonoverlapping(self.region.as_ptr(), out.as_mut_ptr(), out.len()) };
        out
    }

    /// Borrow the buffer bytes without copying
    ///
    /// # Safety
    /// The frame this view came with must not be acknowledged, and its
    /// completion must not have timed out, for as long as the slice lives.
    /// Otherwise the pool may hand the buffer to a writer while it is borrowed.
    pub unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.region.as_ptr(), self.region.size())
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.region.raw_fd()
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn copy_out(region: &dyn MemoryRegion, offset: usize, out: &mut [u8]) -> Result<()> {
    check_range(offset, out.len(), region.size())?;
    // SAFETY: range checked above; `out` is caller-owned and never overlaps
    // a pool region
    unsafe {
        ptr::copy_nonoverlapping(region.as_ptr().add(offset), out.as_mut_ptr(), out.len());
    }
    Ok(())
}

fn check_range(offset: usize, len: usize, capacity: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(IpcBusError::invalid_parameter(
            "offset",
            format!(
                "range {}..{} exceeds buffer capacity {}",
                offset,
                offset.saturating_add(len),
                capacity
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapRegion;

    fn buffer(size: usize) -> SharedBuffer {
        let region = Arc::new(HeapRegion::new(size).unwrap());
        SharedBuffer::new(BufferId::from_raw(region.id()), region)
    }

    #[test]
    fn test_write_read() {
        let mut buf = buffer(16);
        buf.write(4, b"lidar").unwrap();
        assert_eq!(buf.read(4, 5).unwrap(), b"lidar");

        let view = buf.view();
        assert_eq!(view.id(), buf.id());
        let mut out = [0u8; 5];
        view.read_into(4, &mut out).unwrap();
        assert_eq!(&out, b"lidar");
        assert_eq!(&view.to_vec()[4..9], b"lidar");
    }

    #[test]
    fn test_view_reads_are_snapshots() {
        let mut buf = buffer(4);
        let view = buf.view();
        let before = view.read(0, 4).unwrap();

        buf.write(0, &[42]).unwrap();
        assert_eq!(before, vec![0, 0, 0, 0]);
        assert_eq!(view.read(0, 1).unwrap(), vec![42]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut buf = buffer(8);
        assert!(buf.write(6, &[1, 2, 3]).is_err());
        assert!(buf.read(usize::MAX, 2).is_err());
        assert!(buf.view().read_into(4, &mut [0u8; 5]).is_err());
        assert!(buf.write(0, &[0; 8]).is_ok());
    }

    #[test]
    fn test_clear() {
        let mut buf = buffer(4);
        buf.write(0, &[9, 9, 9, 9]).unwrap();
        buf.clear();
        assert_eq!(buf.read(0, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_unchecked_slice_matches_copy() {
        let mut buf = buffer(8);
        buf.write(2, b"ok").unwrap();
        let view = buf.view();
        // No writer touches the buffer while the slice lives
        let bytes = unsafe { view.as_slice() };
        assert_eq!(&bytes[2..4], b"ok");
    }
}
