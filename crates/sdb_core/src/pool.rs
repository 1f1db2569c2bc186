//! Reusable scratch buffers for encoding and decoding.
//!
//! Every `get`/`set` borrows a buffer from the pool and hands it back when
//! the guard drops, success or failure. The pool never blocks and never
//! fails: when it is empty a fresh buffer is allocated, and when it is full
//! (or a buffer grew past the byte cap) the returned buffer is simply freed.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Capacity given to buffers created by [`BufferPool::fill`].
const PREFILL_CAPACITY: usize = 512;

/// A bounded pool of byte buffers.
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    size: usize,
    max_bytes: usize,
}

impl BufferPool {
    /// A pool keeping at most `size` idle buffers of at most `max_bytes`
    /// capacity each.
    #[must_use]
    pub fn new(size: usize, max_bytes: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(size)),
            size,
            max_bytes,
        }
    }

    /// Preallocates buffers until the pool holds `size` of them.
    pub fn fill(&self) {
        let mut idle = self.idle.lock();
        let cap = PREFILL_CAPACITY.min(self.max_bytes);
        while idle.len() < self.size {
            idle.push(Vec::with_capacity(cap));
        }
    }

    /// Borrows an empty buffer.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self.idle.lock().pop().unwrap_or_default();
        PooledBuffer { pool: self, buf }
    }

    /// Returns a buffer to the pool.
    ///
    /// Buffers whose capacity exceeds the byte cap, or that arrive while the
    /// pool is full, are dropped.
    pub fn add(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_bytes {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.size {
            idle.push(buf);
        }
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Maximum number of idle buffers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest capacity a buffer may have and still be pooled.
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("size", &self.size)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]; goes back on drop.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.add(std::mem::take(&mut self.buf));
    }
}
