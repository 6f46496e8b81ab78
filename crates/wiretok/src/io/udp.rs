//! UDP tunnel device.
//!
//! Runs the service without a kernel-bypass NIC: each queue owns one
//! non-blocking UDP socket and every datagram carries a whole frame, link
//! header included. Hardware addresses are mapped to socket addresses by
//! learning: the source address of each received frame carrying the service
//! protocol tag is remembered, and responses are routed by their destination
//! address.
//!
//! The peer table holds at most [`DEFAULT_MAX_PEERS`] entries unless
//! configured otherwise; learning a new address into a full table evicts an
//! arbitrary existing one.

use super::{IoError, PacketBuf, PacketPool, PacketQueue};
use crate::frame::{self, HwAddr};
use ahash::AHashMap;
use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
};

pub const DEFAULT_MAX_PEERS: usize = 4096;

/// A [`PacketQueue`] backed by a non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpTunnelQueue {
    id: u16,
    socket: UdpSocket,
    pool: PacketPool,
    ether_type: u16,
    peers: AHashMap<HwAddr, SocketAddr>,
    max_peers: usize,
    evicted: u64,
    unroutable: u64,
    send_errors: u64,
    /// Consumed by `tx_burst` without being sent, not yet reported.
    tx_dropped: u64,
}

impl UdpTunnelQueue {
    /// Binds queue `id` to `addr` and draws receive buffers from `pool`.
    ///
    /// Peers are learned from frames tagged [`frame::DEFAULT_ETHER_TYPE`]
    /// until [`with_ether_type`](Self::with_ether_type) says otherwise.
    pub fn bind(id: u16, addr: impl ToSocketAddrs, pool: PacketPool) -> Result<Self, IoError> {
        let open = |source| IoError::Open { queue: id, source };
        let socket = UdpSocket::bind(addr).map_err(open)?;
        socket.set_nonblocking(true).map_err(open)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(queue = id, addr = ?socket.local_addr().ok(), "tunnel queue bound");

        Ok(Self {
            id,
            socket,
            pool,
            ether_type: frame::DEFAULT_ETHER_TYPE,
            peers: AHashMap::new(),
            max_peers: DEFAULT_MAX_PEERS,
            evicted: 0,
            unroutable: 0,
            send_errors: 0,
            tx_dropped: 0,
        })
    }

    /// Only frames carrying `ether_type` teach the queue a peer.
    #[must_use]
    pub fn with_ether_type(mut self, ether_type: u16) -> Self {
        self.ether_type = ether_type;
        self
    }

    /// Caps the peer table at `max_peers` entries (at least one).
    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers.max(1);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Responses dropped because their destination was never seen.
    pub fn unroutable(&self) -> u64 {
        self.unroutable
    }

    /// Responses dropped because the socket refused them.
    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    /// Number of learned hardware addresses.
    pub fn peers(&self) -> usize {
        self.peers.len()
    }

    /// Peers forgotten to make room for new ones.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn learn(&mut self, frame: &[u8], peer: SocketAddr) {
        if frame::ether_type(frame) != Some(self.ether_type) {
            return;
        }
        let Some(addr) = frame::source_addr(frame) else {
            return;
        };
        if self.peers.len() >= self.max_peers && !self.peers.contains_key(&addr) {
            if let Some(victim) = self.peers.keys().next().copied() {
                self.peers.remove(&victim);
                self.evicted += 1;

                #[cfg(feature = "tracing")]
                tracing::trace!(queue = self.id, %victim, "peer table full, evicted");
            }
        }
        self.peers.insert(addr, peer);
    }
}

impl PacketQueue for UdpTunnelQueue {
    fn queue_id(&self) -> u16 {
        self.id
    }

    fn rx_burst(&mut self, out: &mut Vec<PacketBuf>, max: usize) -> usize {
        let mut received = 0;
        while received < max {
            let Some(mut buf) = self.pool.alloc() else {
                break;
            };
            let mut from = None;
            let result = buf.fill_with(|data| {
                let (len, peer) = self.socket.recv_from(data)?;
                from = Some(peer);
                Ok::<_, std::io::Error>(len)
            });

            match result {
                Ok(_) => {
                    if let Some(peer) = from {
                        self.learn(buf.as_slice(), peer);
                    }
                    out.push(buf);
                    received += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(queue = self.id, error = %_e, "tunnel recv failed");
                    break;
                }
            }
        }
        received
    }

    /// Unroutable frames and frames the socket refuses are consumed, counted
    /// and reported through [`take_tx_dropped`](PacketQueue::take_tx_dropped).
    fn tx_burst(&mut self, bufs: &mut Vec<PacketBuf>) -> usize {
        let mut accepted = 0;
        for buf in bufs.iter() {
            let frame = buf.as_slice();
            let Some(peer) = frame::destination_addr(frame).and_then(|dst| self.peers.get(&dst))
            else {
                #[cfg(feature = "tracing")]
                tracing::trace!(queue = self.id, "no route for response");
                self.unroutable += 1;
                self.tx_dropped += 1;
                accepted += 1;
                continue;
            };

            match self.socket.send_to(frame, peer) {
                Ok(_) => accepted += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(queue = self.id, %peer, error = %_e, "tunnel send failed");
                    self.send_errors += 1;
                    self.tx_dropped += 1;
                    accepted += 1;
                }
            }
        }
        bufs.drain(..accepted);
        accepted
    }

    fn take_tx_dropped(&mut self) -> u64 {
        core::mem::take(&mut self.tx_dropped)
    }
}
