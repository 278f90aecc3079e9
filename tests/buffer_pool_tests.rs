//! Tests for buffer pools over every backing type

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use ipcbus::{
        buffers::BufferState, BackingType, BufferPool, BufferPoolConfig, BufferPoolConfigBuilder,
        IpcBusError, MappedRegionAllocator, RegionAllocator,
    };
    use tempfile::TempDir;

    fn pool(backing: BackingType, count: usize) -> BufferPool {
        BufferPool::new(
            BufferPoolConfig::new("pool-test")
                .with_num_buffers(count)
                .with_buffer_size(4096)
                .with_backing(backing),
        )
        .unwrap()
    }

    fn backings() -> Vec<BackingType> {
        let mut backings = vec![BackingType::Heap, BackingType::FileBacked];
        #[cfg(target_os = "linux")]
        backings.push(BackingType::MemFd);
        backings
    }

    #[test]
    fn test_exhaustion_and_return() {
        for backing in backings() {
            let pool = pool(backing, 3);

            let buffers: Vec<_> = (0..3).map(|_| pool.checkout().unwrap()).collect();
            let ids: HashSet<_> = buffers.iter().map(|b| b.id()).collect();
            assert_eq!(ids.len(), 3, "{} pool handed out a buffer twice", backing.name());

            assert!(pool.checkout().is_none());
            assert_eq!(pool.available_count(), 0);
            assert_eq!(pool.stats().exhausted, 1);

            let returned = buffers[1].id();
            pool.return_buffer(returned).unwrap();
            assert_eq!(pool.buffer_state(returned), Some(BufferState::Available));

            let again = pool.checkout().unwrap();
            assert_eq!(again.id(), returned);
            assert!(pool.checkout().is_none());
        }
    }

    #[test]
    fn test_return_is_idempotent() {
        let pool = pool(BackingType::Heap, 2);
        let buffer = pool.checkout().unwrap();
        let id = buffer.id();

        pool.return_buffer(id).unwrap();
        pool.return_buffer(id).unwrap();
        assert_eq!(pool.available_count(), 2);
        assert_eq!(pool.stats().returns, 1);
    }

    #[test]
    fn test_unknown_buffer_rejected() {
        let first = pool(BackingType::Heap, 1);
        let second = pool(BackingType::Heap, 1);
        let foreign = second.checkout().unwrap();

        assert!(matches!(
            first.return_buffer(foreign.id()),
            Err(IpcBusError::UnknownBuffer { .. })
        ));
    }

    #[test]
    fn test_contents_survive_checkout() {
        for backing in backings() {
            let pool = pool(backing, 1);
            let mut buffer = pool.checkout().unwrap();
            buffer.write(128, b"lidar-scan").unwrap();
            let id = buffer.id();

            assert_eq!(buffer.read(128, 10).unwrap(), b"lidar-scan");
            assert!(buffer.write(4090, b"overflowing").is_err());
            assert!(pool.buffer(id).is_none());

            pool.release(buffer).unwrap();
            assert_eq!(pool.available_count(), 1);
            let view = pool.buffer(id).unwrap();
            assert_eq!(view.read(128, 10).unwrap(), b"lidar-scan");
        }
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let pool = pool(BackingType::Heap, 2);
        let buffer = pool.checkout().unwrap();

        pool.destroy();
        pool.destroy();
        assert!(pool.is_destroyed());
        assert!(pool.checkout().is_none());
        // Late completions after teardown are tolerated
        pool.return_buffer(buffer.id()).unwrap();
    }

    #[test]
    fn test_concurrent_checkout_never_double_allocates() {
        let pool = Arc::new(pool(BackingType::Heap, 8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..200 {
                        if let Some(buffer) = pool.checkout() {
                            seen.push(buffer.id());
                            pool.release(buffer).unwrap();
                        }
                    }
                    seen
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert!(total > 0);
        assert_eq!(pool.available_count(), 8);
        assert_eq!(pool.in_flight_count(), 0);
        let stats = pool.stats();
        assert_eq!(stats.checkouts, stats.returns);
    }

    #[test]
    fn test_file_backed_pool_in_custom_directory() {
        let dir = TempDir::new().unwrap();
        let allocator = Arc::new(
            MappedRegionAllocator::new(BackingType::FileBacked, "pool-test")
                .unwrap()
                .with_directory(dir.path()),
        ) as Arc<dyn RegionAllocator>;

        let config = BufferPoolConfigBuilder::new("custom-dir")
            .num_buffers(2)
            .buffer_size(8192)
            .backing(BackingType::FileBacked)
            .build()
            .unwrap();
        let pool = BufferPool::with_allocator(config, allocator).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        let buffer = pool.checkout().unwrap();
        assert!(buffer.raw_fd().is_some());
        pool.release(buffer).unwrap();

        pool.destroy();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(BufferPool::new(BufferPoolConfig::new("empty").with_num_buffers(0)).is_err());
        assert!(BufferPool::new(BufferPoolConfig::new("tiny").with_buffer_size(0)).is_err());
        assert!(BufferPoolConfigBuilder::new("").build().is_err());
    }
}
