use super::IoError;
use core::fmt;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct PoolInner {
    free: Mutex<Vec<Box<[u8]>>>,
    buf_size: usize,
    capacity: usize,
    exhausted: AtomicU64,
}

/// A bounded pool of fixed-size packet buffers.
///
/// All buffers are allocated up front. [`alloc`](Self::alloc) never grows
/// the pool; it returns `None` once every buffer is in flight. Cloning the
/// pool shares it.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    /// Preallocates `capacity` buffers of `buf_size` bytes each.
    pub fn new(capacity: usize, buf_size: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0_u8; buf_size].into_boxed_slice())
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buf_size,
                capacity,
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    /// Takes an empty buffer from the pool.
    pub fn alloc(&self) -> Option<PacketBuf> {
        let Some(data) = self.inner.free.lock().pop() else {
            self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        Some(PacketBuf {
            data,
            len: 0,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Like [`alloc`](Self::alloc), reporting exhaustion as an error.
    pub fn try_alloc(&self) -> Result<PacketBuf, IoError> {
        self.alloc().ok_or(IoError::PoolExhausted)
    }

    /// Takes a buffer and fills it with a copy of `frame`.
    pub fn alloc_from(&self, frame: &[u8]) -> Result<PacketBuf, IoError> {
        let mut buf = self.try_alloc()?;
        buf.copy_from_slice(frame)?;
        Ok(buf)
    }

    /// Buffers currently in the free list.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Buffers currently handed out.
    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Number of failed allocations so far.
    pub fn exhausted(&self) -> u64 {
        self.inner.exhausted.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("capacity", &self.inner.capacity)
            .field("buf_size", &self.inner.buf_size)
            .field("available", &self.available())
            .finish()
    }
}

/// A packet buffer borrowed from a [`PacketPool`].
///
/// Dropping it returns the storage to its pool.
pub struct PacketBuf {
    data: Box<[u8]>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl PacketBuf {
    /// Length of the frame held in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total storage size.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The frame bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole storage, regardless of the current length.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_len(&mut self, len: usize) -> Result<(), IoError> {
        if len > self.data.len() {
            return Err(IoError::FrameTooLarge {
                len,
                capacity: self.data.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Replaces the contents with `frame`.
    pub fn copy_from_slice(&mut self, frame: &[u8]) -> Result<(), IoError> {
        let capacity = self.data.len();
        let dst = self
            .data
            .get_mut(..frame.len())
            .ok_or(IoError::FrameTooLarge {
                len: frame.len(),
                capacity,
            })?;
        dst.copy_from_slice(frame);
        self.len = frame.len();
        Ok(())
    }

    /// Lets `fill` write into the whole storage and sets the length to the
    /// value it returns.
    pub fn fill_with<E, F>(&mut self, fill: F) -> Result<usize, E>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, E>,
    {
        let len = fill(&mut self.data)?;
        self.len = len.min(self.data.len());
        Ok(self.len)
    }
}

impl AsRef<[u8]> for PacketBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        let data = core::mem::take(&mut self.data);
        self.pool.free.lock().push(data);
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
