use super::PacketError;
use crate::{frame::FrameError, io::IoError};
use core::{fmt, iter::Sum, ops::AddAssign};
use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicU64, Ordering};

/// Why a received packet produced no response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    Malformed,
    WrongProtocol,
    WrongPort,
    BadLength,
    /// The request's batch container was missing or malformed.
    BadRequest,
    /// The response payload could not be encoded.
    Encoding,
    ResponseTooLarge,
    /// No buffer was available for the response.
    PoolExhausted,
}

impl From<&FrameError> for DropReason {
    fn from(err: &FrameError) -> Self {
        match err {
            FrameError::Malformed { .. } => Self::Malformed,
            FrameError::WrongProtocol { .. } => Self::WrongProtocol,
            FrameError::WrongPort { .. } => Self::WrongPort,
            FrameError::BadLength { .. } => Self::BadLength,
            FrameError::ResponseTooLarge { .. } => Self::ResponseTooLarge,
        }
    }
}

impl From<&PacketError> for DropReason {
    fn from(err: &PacketError) -> Self {
        match err {
            PacketError::Frame(err) => err.into(),
            PacketError::Tokenize(_) => Self::BadRequest,
            PacketError::Payload(_) => Self::Encoding,
            PacketError::Io(IoError::FrameTooLarge { .. }) => Self::ResponseTooLarge,
            PacketError::Io(_) => Self::PoolExhausted,
        }
    }
}

#[derive(Default)]
struct Counters {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    wrong_protocol: AtomicU64,
    wrong_port: AtomicU64,
    bad_length: AtomicU64,
    bad_request: AtomicU64,
    encoding: AtomicU64,
    response_too_large: AtomicU64,
    pool_exhausted: AtomicU64,
    tx_rejected: AtomicU64,
    tx_failed: AtomicU64,
    element_errors: AtomicU64,
}

/// Counters of one worker.
///
/// Only the owning worker writes; any thread may read a [`snapshot`].
/// Padded to a cache line so neighbouring workers' counters do not share
/// one.
///
/// [`snapshot`]: WorkerStats::snapshot
#[derive(Default)]
pub struct WorkerStats {
    counters: CachePadded<Counters>,
}

#[inline]
fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_rx(&self, n: usize) {
        bump(&self.counters.rx_packets, n as u64);
    }

    #[inline]
    pub fn record_tx(&self, n: usize) {
        bump(&self.counters.tx_packets, n as u64);
    }

    /// Counts responses the device refused; they are dropped as well.
    #[inline]
    pub fn record_tx_rejected(&self, n: usize) {
        bump(&self.counters.tx_rejected, n as u64);
        bump(&self.counters.dropped, n as u64);
    }

    /// Counts responses the device accepted but could not deliver; they are
    /// dropped as well.
    #[inline]
    pub fn record_tx_failed(&self, n: usize) {
        bump(&self.counters.tx_failed, n as u64);
        bump(&self.counters.dropped, n as u64);
    }

    #[inline]
    pub fn record_element_errors(&self, n: usize) {
        bump(&self.counters.element_errors, n as u64);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let c = &self.counters;
        bump(&c.dropped, 1);
        let counter = match reason {
            DropReason::Malformed => &c.malformed,
            DropReason::WrongProtocol => &c.wrong_protocol,
            DropReason::WrongPort => &c.wrong_port,
            DropReason::BadLength => &c.bad_length,
            DropReason::BadRequest => &c.bad_request,
            DropReason::Encoding => &c.encoding,
            DropReason::ResponseTooLarge => &c.response_too_large,
            DropReason::PoolExhausted => &c.pool_exhausted,
        };
        bump(counter, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            rx_packets: load(&c.rx_packets),
            tx_packets: load(&c.tx_packets),
            dropped: load(&c.dropped),
            malformed: load(&c.malformed),
            wrong_protocol: load(&c.wrong_protocol),
            wrong_port: load(&c.wrong_port),
            bad_length: load(&c.bad_length),
            bad_request: load(&c.bad_request),
            encoding: load(&c.encoding),
            response_too_large: load(&c.response_too_large),
            pool_exhausted: load(&c.pool_exhausted),
            tx_rejected: load(&c.tx_rejected),
            tx_failed: load(&c.tx_failed),
            element_errors: load(&c.element_errors),
        }
    }
}

impl fmt::Debug for WorkerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkerStats").field(&self.snapshot()).finish()
    }
}

/// Point-in-time copy of one or more workers' counters.
///
/// Counters are read individually, so a snapshot of a running worker is not
/// atomic across fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_packets: u64,
    pub tx_packets: u64,
    /// Packets that produced no transmitted response, for any reason.
    pub dropped: u64,
    pub malformed: u64,
    pub wrong_protocol: u64,
    pub wrong_port: u64,
    pub bad_length: u64,
    pub bad_request: u64,
    pub encoding: u64,
    pub response_too_large: u64,
    pub pool_exhausted: u64,
    pub tx_rejected: u64,
    /// Accepted for transmit, then discarded by the device (no route, send
    /// failure).
    pub tx_failed: u64,
    /// Non-text elements inside otherwise valid batches.
    pub element_errors: u64,
}

impl AddAssign for StatsSnapshot {
    fn add_assign(&mut self, rhs: Self) {
        self.rx_packets += rhs.rx_packets;
        self.tx_packets += rhs.tx_packets;
        self.dropped += rhs.dropped;
        self.malformed += rhs.malformed;
        self.wrong_protocol += rhs.wrong_protocol;
        self.wrong_port += rhs.wrong_port;
        self.bad_length += rhs.bad_length;
        self.bad_request += rhs.bad_request;
        self.encoding += rhs.encoding;
        self.response_too_large += rhs.response_too_large;
        self.pool_exhausted += rhs.pool_exhausted;
        self.tx_rejected += rhs.tx_rejected;
        self.tx_failed += rhs.tx_failed;
        self.element_errors += rhs.element_errors;
    }
}

impl Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx={} tx={} dropped={} (malformed={} protocol={} port={} length={} \
             request={} encoding={} too_large={} pool={} tx_rejected={} tx_failed={}) element_errors={}",
            self.rx_packets,
            self.tx_packets,
            self.dropped,
            self.malformed,
            self.wrong_protocol,
            self.wrong_port,
            self.bad_length,
            self.bad_request,
            self.encoding,
            self.response_too_large,
            self.pool_exhausted,
            self.tx_rejected,
            self.tx_failed,
            self.element_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_count_total_and_reason() {
        let stats = WorkerStats::new();
        stats.record_drop(DropReason::WrongPort);
        stats.record_drop(DropReason::WrongPort);
        stats.record_drop(DropReason::PoolExhausted);
        stats.record_tx_rejected(3);
        stats.record_tx_failed(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.wrong_port, 2);
        assert_eq!(snapshot.pool_exhausted, 1);
        assert_eq!(snapshot.tx_rejected, 3);
        assert_eq!(snapshot.tx_failed, 2);
        assert_eq!(snapshot.dropped, 8);
    }

    #[test]
    fn snapshots_sum_across_workers() {
        let a = WorkerStats::new();
        let b = WorkerStats::new();
        a.record_rx(3);
        b.record_rx(4);
        b.record_tx(2);

        let total: StatsSnapshot = [&a, &b].iter().map(|s| s.snapshot()).sum();
        assert_eq!(total.rx_packets, 7);
        assert_eq!(total.tx_packets, 2);
    }

    #[test]
    fn maps_errors_to_reasons() {
        let err = PacketError::from(FrameError::BadLength {
            declared: 0,
            max: 1,
            available: 1,
        });
        assert_eq!(DropReason::from(&err), DropReason::BadLength);
        assert_eq!(
            DropReason::from(&PacketError::from(IoError::PoolExhausted)),
            DropReason::PoolExhausted
        );
        assert_eq!(
            DropReason::from(&PacketError::from(IoError::FrameTooLarge {
                len: 9,
                capacity: 8
            })),
            DropReason::ResponseTooLarge
        );
        assert_eq!(
            DropReason::from(&PacketError::from(crate::TokenizeError::MissingTexts)),
            DropReason::BadRequest
        );
        assert!(matches!(
            crate::Error::from(PacketError::from(IoError::PoolExhausted)),
            crate::Error::Io(IoError::PoolExhausted)
        ));
    }
}
