//! Allocator injected into native functions that declare one

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct AllocatorStats {
    bytes: AtomicUsize,
    allocations: AtomicUsize,
}

/// Bridge-owned allocator handed to native code through an allocator slot.
///
/// It allocates from the global allocator and keeps running totals, so tests
/// and hosts can observe how much memory native bodies requested.
#[derive(Clone, Default)]
pub struct Allocator {
    stats: Arc<AllocatorStats>,
}

impl Allocator {
    /// Fresh allocator with zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, bytes: usize) {
        self.stats.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroed byte buffer of `len` bytes
    pub fn alloc_bytes(&self, len: usize) -> Vec<u8> {
        self.record(len);
        vec![0; len]
    }

    /// String of `len` copies of `ch`
    pub fn alloc_string(&self, len: usize, ch: char) -> String {
        let mut s = String::with_capacity(len * ch.len_utf8());
        s.extend(std::iter::repeat(ch).take(len));
        self.record(s.capacity());
        s
    }

    /// Vector with room for `capacity` elements
    pub fn alloc_vec<T>(&self, capacity: usize) -> Vec<T> {
        self.record(capacity * std::mem::size_of::<T>());
        Vec::with_capacity(capacity)
    }

    /// Total bytes requested so far
    pub fn bytes_allocated(&self) -> usize {
        self.stats.bytes.load(Ordering::Relaxed)
    }

    /// Number of allocations so far
    pub fn allocation_count(&self) -> usize {
        self.stats.allocations.load(Ordering::Relaxed)
    }
}

impl PartialEq for Allocator {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stats, &other.stats)
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("bytes", &self.bytes_allocated())
            .field("allocations", &self.allocation_count())
            .finish()
    }
}
