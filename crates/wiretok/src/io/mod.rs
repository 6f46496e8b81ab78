//! # Packet I/O Engine
//!
//! Burst-oriented packet I/O over a bounded buffer pool.
//!
//! A [`PacketQueue`] is one hardware (or emulated) queue: a worker owns it
//! exclusively and moves [`PacketBuf`]s in and out of it in bursts. Buffers
//! come from a per-queue [`PacketPool`] and return to it when dropped, so
//! every code path that lets go of a buffer releases it.
//!
//! Two devices are provided:
//! - [`loopback`]: in-memory rings, for tests and benchmarks.
//! - [`udp`]: one non-blocking UDP socket per queue, each datagram carrying
//!   a whole frame.

pub mod loopback;
mod pool;
pub mod udp;

pub use loopback::{LoopbackDevice, LoopbackQueue};
pub use pool::{PacketBuf, PacketPool};
pub use udp::UdpTunnelQueue;

/// Buffer and queue failures.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// A frame does not fit in a pool buffer.
    #[error("frame of {len} bytes exceeds buffer capacity {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },

    /// Every buffer of the pool is in flight.
    #[error("packet pool exhausted")]
    PoolExhausted,

    /// The device has no queue with this id.
    #[error("unknown queue {0}")]
    UnknownQueue(u16),

    /// The queue's underlying endpoint could not be opened.
    #[error("failed to open queue {queue}: {source}")]
    Open {
        queue: u16,
        #[source]
        source: std::io::Error,
    },
}

/// A non-blocking burst interface to one device queue.
///
/// Neither method ever blocks. Ownership of a buffer is always with exactly
/// one party: the queue until `rx_burst` hands it out, the caller until
/// `tx_burst` accepts it.
pub trait PacketQueue: Send {
    /// Identifier of this queue on its device.
    fn queue_id(&self) -> u16;

    /// Appends up to `max` received buffers to `out` and returns how many
    /// were appended. Zero is not an error.
    fn rx_burst(&mut self, out: &mut Vec<PacketBuf>, max: usize) -> usize;

    /// Submits `bufs` for transmission and returns how many were accepted.
    ///
    /// Accepted buffers form a prefix of `bufs` and are removed from it;
    /// rejected buffers remain in `bufs` and stay owned by the caller.
    fn tx_burst(&mut self, bufs: &mut Vec<PacketBuf>) -> usize;

    /// Returns, and resets, how many buffers accepted by `tx_burst` since the
    /// previous call were consumed without being sent.
    ///
    /// Devices that never discard accepted buffers keep the default.
    fn take_tx_dropped(&mut self) -> u64 {
        0
    }
}

impl<Q: PacketQueue + ?Sized> PacketQueue for Box<Q> {
    fn queue_id(&self) -> u16 {
        (**self).queue_id()
    }

    fn rx_burst(&mut self, out: &mut Vec<PacketBuf>, max: usize) -> usize {
        (**self).rx_burst(out, max)
    }

    fn tx_burst(&mut self, bufs: &mut Vec<PacketBuf>) -> usize {
        (**self).tx_burst(bufs)
    }

    fn take_tx_dropped(&mut self) -> u64 {
        (**self).take_tx_dropped()
    }
}
