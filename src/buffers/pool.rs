//! Fixed pool of shared buffers

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    error::{IpcBusError, Result},
    memory::{allocator_for, MemoryRegion, RegionAllocator},
};

use super::{
    buffer::{BufferId, BufferView, SharedBuffer},
    config::BufferPoolConfig,
    stats::{AtomicBufferPoolStats, BufferPoolStats},
};

/// Ownership state of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Sitting in the pool
    Available,
    /// Owned by a publisher or waiting on subscriber acknowledgments
    CheckedOut,
}

#[derive(Debug)]
struct Slot {
    id: BufferId,
    region: Arc<dyn MemoryRegion>,
    state: BufferState,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    destroyed: bool,
}

/// A fixed set of equally sized buffers
///
/// Buffers are allocated once at creation. Checkout never blocks: an empty
/// pool yields `None` and the caller decides to retry or skip the frame.
#[derive(Debug)]
pub struct BufferPool {
    config: BufferPoolConfig,
    allocator: Arc<dyn RegionAllocator>,
    state: Mutex<PoolState>,
    stats: AtomicBufferPoolStats,
}

impl BufferPool {
    /// Create a pool using the allocator matching `config.backing`
    pub fn new(config: BufferPoolConfig) -> Result<Self> {
        config.validate()?;
        let allocator = allocator_for(config.backing, &config.name)?;
        Self::with_allocator(config, allocator)
    }

    /// Create a pool drawing its regions from `allocator`
    pub fn with_allocator(
        config: BufferPoolConfig,
        allocator: Arc<dyn RegionAllocator>,
    ) -> Result<Self> {
        config.validate()?;

        let mut slots = Vec::with_capacity(config.num_buffers);
        for _ in 0..config.num_buffers {
            match allocator.allocate(config.buffer_size) {
                Ok(region) => slots.push(Slot {
                    id: BufferId::from_raw(region.id()),
                    region,
                    state: BufferState::Available,
                }),
                Err(e) => {
                    for slot in slots {
                        let _ = allocator.release(slot.region);
                    }
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Created pool {}: {} x {} bytes ({})",
            config.name,
            config.num_buffers,
            config.buffer_size,
            allocator.backing_type().name()
        );

        Ok(Self {
            stats: AtomicBufferPoolStats::new(config.num_buffers),
            config,
            allocator,
            state: Mutex::new(PoolState {
                slots,
                destroyed: false,
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take an available buffer, or `None` if all are checked out
    pub fn checkout(&self) -> Option<SharedBuffer> {
        let mut state = self.lock_state();
        if state.destroyed {
            log::warn!("Checkout on destroyed pool {}", self.config.name);
            return None;
        }

        match state
            .slots
            .iter_mut()
            .find(|slot| slot.state == BufferState::Available)
        {
            Some(slot) => {
                slot.state = BufferState::CheckedOut;
                self.stats.record_checkout();
                Some(SharedBuffer::new(slot.id, Arc::clone(&slot.region)))
            }
            None => {
                self.stats.record_exhausted();
                log::debug!("Pool {} exhausted", self.config.name);
                None
            }
        }
    }

    /// Mark a buffer available again
    ///
    /// Returning an already available buffer is a no-op, so late or duplicate
    /// completion callbacks cannot corrupt the pool.
    pub fn return_buffer(&self, id: BufferId) -> Result<()> {
        let mut state = self.lock_state();
        if state.destroyed {
            log::debug!("Buffer {} returned after pool {} was destroyed", id, self.config.name);
            return Ok(());
        }

        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.id == id)
            .ok_or(IpcBusError::UnknownBuffer {
                buffer_id: id.as_u64(),
            })?;

        if slot.state == BufferState::CheckedOut {
            slot.state = BufferState::Available;
            self.stats.record_return();
        }
        Ok(())
    }

    /// Give back a buffer that was never published
    pub fn release(&self, buffer: SharedBuffer) -> Result<()> {
        self.return_buffer(buffer.id())
    }

    /// Release every region; later checkouts yield `None`
    pub fn destroy(&self) {
        let slots = {
            let mut state = self.lock_state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            std::mem::take(&mut state.slots)
        };

        let in_flight = slots
            .iter()
            .filter(|slot| slot.state == BufferState::CheckedOut)
            .count();
        if in_flight > 0 {
            log::warn!(
                "Destroying pool {} with {} buffers still checked out",
                self.config.name,
                in_flight
            );
        }

        for slot in slots {
            if let Err(e) = self.allocator.release(slot.region) {
                log::warn!("Failed to release buffer {}: {}", slot.id, e);
            }
        }
        log::debug!("Destroyed pool {}", self.config.name);
    }

    /// Read-only view of an available buffer
    ///
    /// `None` for unknown ids and for buffers currently checked out, whose
    /// bytes belong to their publisher.
    pub fn buffer(&self, id: BufferId) -> Option<BufferView> {
        let state = self.lock_state();
        state
            .slots
            .iter()
            .find(|slot| slot.id == id && slot.state == BufferState::Available)
            .map(|slot| SharedBuffer::new(slot.id, Arc::clone(&slot.region)).view())
    }

    /// State of a buffer, `None` if the id is not part of this pool
    pub fn buffer_state(&self, id: BufferId) -> Option<BufferState> {
        let state = self.lock_state();
        state
            .slots
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.state)
    }

    pub fn available_count(&self) -> usize {
        let state = self.lock_state();
        state
            .slots
            .iter()
            .filter(|slot| slot.state == BufferState::Available)
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        let state = self.lock_state();
        state
            .slots
            .iter()
            .filter(|slot| slot.state == BufferState::CheckedOut)
            .count()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock_state().destroyed
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn num_buffers(&self) -> usize {
        self.config.num_buffers
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.stats.snapshot()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
