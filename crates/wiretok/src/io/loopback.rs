//! In-memory device.
//!
//! Each queue has an rx ring fed by [`LoopbackDevice::inject`] and a tx sink
//! drained by [`LoopbackDevice::take_transmitted`]. A per-queue transmit
//! limit makes `tx_burst` accept only part of a burst.

use super::{IoError, PacketBuf, PacketPool, PacketQueue};
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::{collections::VecDeque, sync::Arc};

const UNLIMITED: usize = usize::MAX;

#[derive(Debug)]
struct Ring {
    rx: Mutex<VecDeque<PacketBuf>>,
    tx: Mutex<Vec<PacketBuf>>,
    tx_limit: AtomicUsize,
}

impl Default for Ring {
    fn default() -> Self {
        Self {
            rx: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Vec::new()),
            tx_limit: AtomicUsize::new(UNLIMITED),
        }
    }
}

/// Test-side handle of an in-memory multi-queue device.
#[derive(Clone, Debug)]
pub struct LoopbackDevice {
    pool: PacketPool,
    rings: Vec<Arc<Ring>>,
}

impl LoopbackDevice {
    /// A device with `queues` queues whose injected frames are drawn from
    /// `pool`.
    pub fn new(queues: u16, pool: PacketPool) -> Self {
        Self {
            pool,
            rings: (0..queues).map(|_| Arc::default()).collect(),
        }
    }

    fn ring(&self, queue: u16) -> Result<&Arc<Ring>, IoError> {
        self.rings
            .get(usize::from(queue))
            .ok_or(IoError::UnknownQueue(queue))
    }

    /// Copies `frame` into a pool buffer and appends it to `queue`'s rx ring.
    pub fn inject(&self, queue: u16, frame: &[u8]) -> Result<(), IoError> {
        let ring = self.ring(queue)?;
        let buf = self.pool.alloc_from(frame)?;
        ring.rx.lock().push_back(buf);
        Ok(())
    }

    /// Removes and returns every frame transmitted on `queue`, in order.
    ///
    /// The buffers are released back to their pool.
    pub fn take_transmitted(&self, queue: u16) -> Result<Vec<Vec<u8>>, IoError> {
        let bufs = core::mem::take(&mut *self.ring(queue)?.tx.lock());
        Ok(bufs.iter().map(|buf| buf.as_slice().to_vec()).collect())
    }

    /// Caps how many buffers each `tx_burst` on `queue` accepts.
    pub fn set_tx_limit(&self, queue: u16, limit: Option<usize>) -> Result<(), IoError> {
        self.ring(queue)?
            .tx_limit
            .store(limit.unwrap_or(UNLIMITED), Ordering::Relaxed);
        Ok(())
    }

    /// Frames waiting in `queue`'s rx ring.
    pub fn pending_rx(&self, queue: u16) -> Result<usize, IoError> {
        Ok(self.ring(queue)?.rx.lock().len())
    }

    /// The worker-side end of `queue`.
    pub fn queue(&self, queue: u16) -> Result<LoopbackQueue, IoError> {
        Ok(LoopbackQueue {
            id: queue,
            ring: Arc::clone(self.ring(queue)?),
        })
    }

    /// Worker-side ends of every queue, in id order.
    pub fn queues(&self) -> Vec<LoopbackQueue> {
        self.rings
            .iter()
            .zip(0..)
            .map(|(ring, id)| LoopbackQueue {
                id,
                ring: Arc::clone(ring),
            })
            .collect()
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }
}

/// Worker-side end of one [`LoopbackDevice`] queue.
#[derive(Debug)]
pub struct LoopbackQueue {
    id: u16,
    ring: Arc<Ring>,
}

impl PacketQueue for LoopbackQueue {
    fn queue_id(&self) -> u16 {
        self.id
    }

    fn rx_burst(&mut self, out: &mut Vec<PacketBuf>, max: usize) -> usize {
        let mut rx = self.ring.rx.lock();
        let count = max.min(rx.len());
        out.extend(rx.drain(..count));
        count
    }

    fn tx_burst(&mut self, bufs: &mut Vec<PacketBuf>) -> usize {
        let limit = self.ring.tx_limit.load(Ordering::Relaxed);
        let accepted = limit.min(bufs.len());
        self.ring.tx.lock().extend(bufs.drain(..accepted));
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_frames_come_out_in_bursts() {
        let device = LoopbackDevice::new(2, PacketPool::new(8, 32));
        for frame in [b"a", b"b", b"c"] {
            device.inject(1, frame).unwrap();
        }

        let mut queue = device.queue(1).unwrap();
        let mut rx = Vec::new();
        assert_eq!(queue.rx_burst(&mut rx, 2), 2);
        assert_eq!(rx[0].as_slice(), b"a");
        assert_eq!(rx[1].as_slice(), b"b");
        assert_eq!(device.pending_rx(1).unwrap(), 1);

        let mut empty = device.queue(0).unwrap();
        assert_eq!(empty.rx_burst(&mut rx, 8), 0);
    }

    #[test]
    fn tx_limit_leaves_rejected_buffers_with_caller() {
        let pool = PacketPool::new(4, 32);
        let device = LoopbackDevice::new(1, pool.clone());
        device.set_tx_limit(0, Some(1)).unwrap();

        let mut queue = device.queue(0).unwrap();
        let mut tx = vec![
            pool.alloc_from(b"one").unwrap(),
            pool.alloc_from(b"two").unwrap(),
        ];
        assert_eq!(queue.tx_burst(&mut tx), 1);
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].as_slice(), b"two");

        drop(tx);
        assert_eq!(device.take_transmitted(0).unwrap(), vec![b"one".to_vec()]);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn unknown_queues_are_reported() {
        let device = LoopbackDevice::new(1, PacketPool::new(1, 8));
        assert!(matches!(device.inject(3, b"x"), Err(IoError::UnknownQueue(3))));
        assert!(device.queue(1).is_err());
        assert_eq!(device.queues().len(), 1);
    }
}
