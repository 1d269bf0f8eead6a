//! Injectable buffer allocation.
//!
//! Every numeric buffer the codec creates comes from a [`BufferAllocator`] and is
//! handed back to it exactly once, when the owning [`Buffer`] is dropped. Drop
//! order gives the recursive close: a composite array drops its children before
//! its own storage goes away, including on error paths.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Two-method allocation interface.
pub trait BufferAllocator: Send + Sync + fmt::Debug {
    /// Returns a zeroed buffer of exactly `len` bytes.
    fn allocate(&self, len: usize) -> Vec<u8>;

    /// Takes back a buffer previously returned by [`allocate`](Self::allocate).
    fn release(&self, buffer: Vec<u8>);
}

/// The default allocator: plain heap vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Vec<u8> {
        vec![0; len]
    }

    fn release(&self, _buffer: Vec<u8>) {}
}

/// Returns the shared default allocator.
pub fn default_allocator() -> Arc<dyn BufferAllocator> {
    Arc::new(HeapAllocator)
}

/// Recycles released buffers by power-of-two capacity class.
///
/// Useful when the same file shape is read repeatedly. Retained memory is
/// capped at `max_pooled_bytes`.
#[derive(Debug)]
pub struct PooledAllocator {
    free: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    max_pooled_bytes: usize,
    pooled_bytes: AtomicUsize,
    outstanding: AtomicUsize,
}

impl PooledAllocator {
    /// Creates a pool retaining at most `max_pooled_bytes`.
    pub fn new(max_pooled_bytes: usize) -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
            max_pooled_bytes,
            pooled_bytes: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Buffers handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Bytes currently retained for reuse.
    pub fn pooled_bytes(&self) -> usize {
        self.pooled_bytes.load(Ordering::SeqCst)
    }

    fn class_of(len: usize) -> usize {
        len.max(64).next_power_of_two()
    }
}

impl BufferAllocator for PooledAllocator {
    fn allocate(&self, len: usize) -> Vec<u8> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let class = Self::class_of(len);
        let recycled = {
            let mut free = self.free.lock().unwrap_or_else(|p| p.into_inner());
            free.get_mut(&class).and_then(Vec::pop)
        };
        match recycled {
            Some(mut buf) => {
                self.pooled_bytes.fetch_sub(buf.capacity(), Ordering::SeqCst);
                buf.clear();
                buf.resize(len, 0);
                buf
            }
            None => {
                let mut buf = Vec::with_capacity(class);
                buf.resize(len, 0);
                buf
            }
        }
    }

    fn release(&self, buffer: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        let capacity = buffer.capacity();
        if !capacity.is_power_of_two()
            || self.pooled_bytes.load(Ordering::SeqCst) + capacity > self.max_pooled_bytes
        {
            return;
        }
        self.pooled_bytes.fetch_add(capacity, Ordering::SeqCst);
        let mut free = self.free.lock().unwrap_or_else(|p| p.into_inner());
        free.entry(capacity).or_default().push(buffer);
    }
}

/// An allocator-backed byte buffer, released on drop.
pub struct Buffer {
    bytes: Vec<u8>,
    allocator: Arc<dyn BufferAllocator>,
}

impl Buffer {
    /// Allocates a zeroed buffer of `len` bytes.
    pub fn new(len: usize, allocator: &Arc<dyn BufferAllocator>) -> Self {
        Self { bytes: allocator.allocate(len), allocator: Arc::clone(allocator) }
    }

    /// Allocates a buffer and copies `data` into it.
    pub fn copy_from(data: &[u8], allocator: &Arc<dyn BufferAllocator>) -> Self {
        let mut buffer = Self::new(data.len(), allocator);
        buffer.copy_from_slice(data);
        buffer
    }

    /// The allocator this buffer returns to.
    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self::copy_from(&self.bytes, &self.allocator)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.allocator.release(std::mem::take(&mut self.bytes));
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_zeroed_and_released_once() {
        let pool = Arc::new(PooledAllocator::new(1 << 20));
        let alloc: Arc<dyn BufferAllocator> = pool.clone();
        {
            let mut a = Buffer::new(100, &alloc);
            assert!(a.iter().all(|b| *b == 0));
            a[0] = 42;
            let b = a.clone();
            assert_eq!(b[0], 42);
            assert_eq!(pool.outstanding(), 2);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled_bytes(), 256);

        let again = Buffer::new(90, &alloc);
        assert!(again.iter().all(|b| *b == 0));
        assert_eq!(pool.pooled_bytes(), 128);
    }

    #[test]
    fn pool_respects_its_cap() {
        let pool = Arc::new(PooledAllocator::new(64));
        let alloc: Arc<dyn BufferAllocator> = pool.clone();
        drop(Buffer::new(1000, &alloc));
        assert_eq!(pool.pooled_bytes(), 0);
        assert_eq!(pool.outstanding(), 0);
    }
}
