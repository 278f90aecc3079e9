//! Callbacks invoked by a dispatch queue

/// Receives the items flowing through a [`DispatchQueue`](super::DispatchQueue)
///
/// `on_item` runs on the queue's consumer thread, one item at a time.
/// `on_discarded` runs on the producer's thread. `on_drained` runs on the
/// thread calling `stop`, after the consumer has been joined.
pub trait DispatchHandler<T>: Send + Sync + 'static {
    /// Process one item in arrival order
    fn on_item(&self, item: T);

    /// An item was evicted (queue full) or refused (queue stopped)
    fn on_discarded(&self, _item: T) {}

    /// Items still queued when the consumer stopped
    fn on_drained(&self, _remaining: Vec<T>) {}
}

impl<T, F> DispatchHandler<T> for F
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_item(&self, item: T) {
        self(item)
    }
}
