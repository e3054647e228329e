//! Cache-line padding to keep the enqueue/dequeue cursors from false-sharing.

/// Pads `T` out to a 64-byte cache line so two adjacent instances never share one.
#[repr(align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}
