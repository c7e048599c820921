// src/util/allocator.rs - Reusable byte buffer pool
//
// Core features:
// - First-fit reuse of released buffers by capacity
// - Grows on demand, never evicts
// - One mutex per pool; allocate/release are the only mutating operations

use crate::util::lock;
use std::sync::{Mutex, MutexGuard};

/// Default buffer size for video tags
pub const VIDEO_ALLOC_SIZE: usize = 128 * 1024;
/// Default buffer size for audio tags
pub const AUDIO_ALLOC_SIZE: usize = 4 * 1024;

const SPARE_SLOTS: usize = 10;

/// A growable byte buffer with a logical fill level.
///
/// The capacity starts at the size requested from the pool. Writes past it
/// grow the backing storage instead of failing, so `size <= capacity` always
/// holds; the grown buffer keeps its larger capacity when released.
#[derive(Debug)]
pub struct Allocation {
    data: Vec<u8>,
    size: usize,
}

impl Allocation {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The filled part of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Start of the backing storage, stable for the allocation's lifetime
    /// unless a write has to grow it.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Appends one byte.
    pub fn put(&mut self, b: u8) {
        let pos = self.size;
        self.put_at(b, pos);
    }

    /// Writes one byte at `pos`, extending the fill level if `pos` is past it.
    pub fn put_at(&mut self, b: u8, pos: usize) {
        self.reserve_to(pos + 1);
        self.data[pos] = b;
        self.size = self.size.max(pos + 1);
    }

    /// Appends a slice.
    pub fn put_slice(&mut self, bs: &[u8]) {
        let end = self.size + bs.len();
        self.reserve_to(end);
        self.data[self.size..end].copy_from_slice(bs);
        self.size = end;
    }

    /// Writes a slice at `pos`, extending the fill level if needed.
    pub fn put_slice_at(&mut self, bs: &[u8], pos: usize) {
        let end = pos + bs.len();
        self.reserve_to(end);
        self.data[pos..end].copy_from_slice(bs);
        self.size = self.size.max(end);
    }

    /// Marks `n` more bytes as filled (bytes written through `put_*_at`).
    pub fn append_offset(&mut self, n: usize) {
        let end = self.size + n;
        self.reserve_to(end);
        self.size = end;
    }

    fn reserve_to(&mut self, len: usize) {
        if len > self.data.len() {
            self.data.resize(len, 0);
        }
    }
}

/// Pool of [`Allocation`]s.
///
/// Released buffers are parked in the first free slot; `allocate` hands out
/// the first parked buffer whose capacity fits. A buffer is owned by exactly
/// one holder at a time because it is moved out of the pool on allocate and
/// moved back on release.
#[derive(Debug)]
pub struct AllocatorPool {
    individual_allocation_size: usize,
    slots: Mutex<Vec<Option<Allocation>>>,
}

impl AllocatorPool {
    /// Creates an empty pool.
    pub fn new(individual_allocation_size: usize) -> Self {
        Self::with_initial_count(individual_allocation_size, 0)
    }

    /// Creates a pool with `initial_count` buffers allocated up front.
    ///
    /// # Arguments
    /// * `individual_allocation_size` - Minimum capacity of every buffer
    /// * `initial_count` - Buffers to create eagerly
    pub fn with_initial_count(individual_allocation_size: usize, initial_count: usize) -> Self {
        let mut slots = Vec::with_capacity(initial_count + SPARE_SLOTS);
        for _ in 0..initial_count {
            slots.push(Some(Allocation::new(individual_allocation_size)));
        }
        Self {
            individual_allocation_size,
            slots: Mutex::new(slots),
        }
    }

    /// Returns a cleared buffer with capacity of at least `min_size`.
    pub fn allocate(&self, min_size: usize) -> Allocation {
        let mut slots = self.slots();
        for slot in slots.iter_mut() {
            if matches!(slot, Some(a) if a.capacity() >= min_size) {
                if let Some(allocation) = slot.take() {
                    return allocation;
                }
            }
        }
        drop(slots);
        Allocation::new(min_size.max(self.individual_allocation_size))
    }

    /// Clears `allocation` and parks it for reuse.
    pub fn release(&self, mut allocation: Allocation) {
        allocation.clear();
        let mut slots = self.slots();
        if let Some(slot) = slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(allocation);
        } else {
            slots.push(Some(allocation));
        }
    }

    /// Number of parked buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.slots().iter().filter(|s| s.is_some()).count()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Allocation>>> {
        lock(&self.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_allocate_creates_at_least_individual_size() {
        let pool = AllocatorPool::new(64);
        assert_eq!(pool.allocate(10).capacity(), 64);
        assert_eq!(pool.allocate(100).capacity(), 100);
    }

    #[test]
    fn test_release_then_allocate_reuses_same_buffer() {
        let pool = AllocatorPool::new(16);
        let mut a = pool.allocate(32);
        a.put_slice(b"hello");
        let ptr = a.as_ptr();
        pool.release(a);
        assert_eq!(pool.available(), 1);

        let b = pool.allocate(20);
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(b.size(), 0);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_too_small_parked_buffer_is_skipped() {
        let pool = AllocatorPool::new(16);
        let small = pool.allocate(16);
        let small_ptr = small.as_ptr();
        pool.release(small);

        let big = pool.allocate(1024);
        assert_ne!(big.as_ptr(), small_ptr);
        assert!(big.capacity() >= 1024);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_first_fit_order() {
        let pool = AllocatorPool::new(8);
        let a = pool.allocate(100);
        let b = pool.allocate(200);
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        pool.release(a);
        pool.release(b);

        // First slot fits, even though the second one is larger.
        assert_eq!(pool.allocate(50).as_ptr(), pa);
        assert_eq!(pool.allocate(150).as_ptr(), pb);
    }

    #[test]
    fn test_pool_grows_past_initial_slots() {
        let pool = AllocatorPool::with_initial_count(8, 2);
        assert_eq!(pool.available(), 2);
        let held: Vec<_> = (0..40).map(|_| pool.allocate(8)).collect();
        for a in held {
            pool.release(a);
        }
        assert_eq!(pool.available(), 40);
    }

    #[test]
    fn test_put_helpers_track_size() {
        let pool = AllocatorPool::new(4);
        let mut a = pool.allocate(4);
        a.put(1);
        a.put_at(9, 3);
        assert_eq!(a.as_slice(), &[1, 0, 0, 9]);
        a.put_slice(&[7, 7]);
        assert_eq!(a.size(), 6);
        assert!(a.capacity() >= 6);
        a.put_slice_at(&[5, 5, 5], 1);
        a.append_offset(1);
        assert_eq!(a.as_slice(), &[1, 5, 5, 5, 7, 7, 0]);
    }

    #[test]
    fn test_grown_buffer_keeps_capacity_after_release() {
        let pool = AllocatorPool::new(4);
        let mut a = pool.allocate(4);
        assert_eq!(a.capacity(), 4);
        a.put_slice(&[1; 10]);
        assert_eq!(a.capacity(), 10);
        assert_eq!(a.size(), 10);
        pool.release(a);

        let b = pool.allocate(10);
        assert_eq!(b.capacity(), 10);
        assert!(b.is_empty());
    }

    #[test]
    fn test_concurrent_allocate_release_never_double_hands() {
        let pool = Arc::new(AllocatorPool::with_initial_count(64, 4));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let a = pool.allocate(32);
                    let b = pool.allocate(32);
                    assert_ne!(a.as_ptr(), b.as_ptr());
                    pool.release(a);
                    pool.release(b);
                }
            }));
        }
        for h in handles {
            h.join().expect("worker panicked");
        }

        let held: Vec<_> = (0..pool.available()).map(|_| pool.allocate(32)).collect();
        let unique: HashSet<usize> = held.iter().map(|a| a.as_ptr() as usize).collect();
        assert_eq!(unique.len(), held.len());
    }
}
