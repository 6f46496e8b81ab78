//! # Frame Codec
//!
//! Parses and builds the service's wire envelope: a link header followed
//! directly by a datagram-style transport header and the payload.
//!
//! ```text
//!  0               6              12      14      16      18      20      22
//!  +---------------+---------------+-------+-------+-------+-------+-------+----
//!  |   dst addr    |   src addr    | type  | sport | dport |  len  | csum  | payload
//!  +---------------+---------------+-------+-------+-------+-------+-------+----
//! ```
//!
//! Every multi-byte field is big-endian and read through bounds-checked
//! accessors at fixed offsets. `len` covers the transport header plus the
//! payload and is authoritative: bytes past it are ignored.

use core::fmt;

/// Hardware address width.
pub const HW_ADDR_LEN: usize = 6;
/// Link header: two hardware addresses and a protocol tag.
pub const LINK_HEADER_LEN: usize = 2 * HW_ADDR_LEN + 2;
/// Transport header: ports, length and checksum.
pub const TRANSPORT_HEADER_LEN: usize = 8;
/// Offset of the first payload byte.
pub const HEADERS_LEN: usize = LINK_HEADER_LEN + TRANSPORT_HEADER_LEN;

pub const DEFAULT_ETHER_TYPE: u16 = 0x88B5;
pub const DEFAULT_LISTEN_PORT: u16 = 67;
pub const DEFAULT_MAX_PACKET_SIZE: usize = 8192;

const DST_ADDR: usize = 0;
const SRC_ADDR: usize = DST_ADDR + HW_ADDR_LEN;
const ETHER_TYPE: usize = SRC_ADDR + HW_ADDR_LEN;
const SRC_PORT: usize = LINK_HEADER_LEN;
const DST_PORT: usize = SRC_PORT + 2;
const DGRAM_LEN: usize = DST_PORT + 2;
const CHECKSUM: usize = DGRAM_LEN + 2;

/// Per-packet validation or construction failure.
///
/// Never fatal: the caller drops the buffer and counts the reason.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes is shorter than the {required}-byte headers")]
    Malformed { len: usize, required: usize },

    #[error("protocol tag {found:#06x} does not match {expected:#06x}")]
    WrongProtocol { found: u16, expected: u16 },

    #[error("destination port {found} does not match listening port {expected}")]
    WrongPort { found: u16, expected: u16 },

    /// Declared payload length is not positive, exceeds `max`, or runs past
    /// the `available` payload bytes.
    #[error("declared payload length {declared} is invalid (max {max}, available {available})")]
    BadLength {
        declared: isize,
        max: usize,
        available: usize,
    },

    #[error("response of {len} bytes exceeds the {max}-byte limit")]
    ResponseTooLarge { len: usize, max: usize },
}

/// A 48-bit hardware address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwAddr(pub [u8; HW_ADDR_LEN]);

impl HwAddr {
    pub const BROADCAST: Self = Self([0xff; HW_ADDR_LEN]);

    pub const fn octets(&self) -> [u8; HW_ADDR_LEN] {
        self.0
    }

    fn read(buf: &[u8], offset: usize) -> Option<Self> {
        let bytes = buf.get(offset..offset + HW_ADDR_LEN)?;
        let mut addr = [0; HW_ADDR_LEN];
        addr.copy_from_slice(bytes);
        Some(Self(addr))
    }
}

impl From<[u8; HW_ADDR_LEN]> for HwAddr {
    fn from(octets: [u8; HW_ADDR_LEN]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwAddr({self})")
    }
}

/// Source hardware address of a raw frame, if it is long enough.
pub fn source_addr(buf: &[u8]) -> Option<HwAddr> {
    HwAddr::read(buf, SRC_ADDR)
}

/// Destination hardware address of a raw frame, if it is long enough.
pub fn destination_addr(buf: &[u8]) -> Option<HwAddr> {
    HwAddr::read(buf, DST_ADDR)
}

/// Protocol tag of a raw frame, if it is long enough.
pub fn ether_type(buf: &[u8]) -> Option<u16> {
    be_u16(buf, ETHER_TYPE)
}

#[inline]
fn be_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[inline]
fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Protocol selectors and size limit used by [`FrameCodec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecConfig {
    /// Protocol tag accepted on receive.
    pub ether_type: u16,
    /// Transport destination port accepted on receive.
    pub listen_port: u16,
    /// Protocol tag written into responses.
    pub response_ether_type: u16,
    /// Upper bound on a whole frame, headers included.
    pub max_packet_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            ether_type: DEFAULT_ETHER_TYPE,
            listen_port: DEFAULT_LISTEN_PORT,
            response_ether_type: DEFAULT_ETHER_TYPE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl CodecConfig {
    /// Largest payload a frame of `max_packet_size` can carry.
    pub fn max_payload(&self) -> usize {
        self.max_packet_size
            .saturating_sub(HEADERS_LEN)
            .min(usize::from(u16::MAX) - TRANSPORT_HEADER_LEN)
    }
}

/// A validated view into a received frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub dst_addr: HwAddr,
    pub src_addr: HwAddr,
    pub ether_type: u16,
    pub src_port: u16,
    pub dst_port: u16,
    /// Exactly the declared payload; trailing bytes are excluded.
    pub payload: &'a [u8],
}

impl ParsedFrame<'_> {
    /// Header of the reply to this frame: addresses and ports swapped.
    pub fn reply_header(&self, ether_type: u16) -> FrameHeader {
        FrameHeader {
            dst_addr: self.src_addr,
            src_addr: self.dst_addr,
            ether_type,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

/// Header fields of an outgoing frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub dst_addr: HwAddr,
    pub src_addr: HwAddr,
    pub ether_type: u16,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FrameHeader {
    /// Writes headers plus `payload` into `out` and returns the frame length.
    ///
    /// The length field is derived from `payload` and the checksum is zero.
    /// Fails with [`FrameError::ResponseTooLarge`] if the frame would exceed
    /// `max_packet_size`, the 16-bit length field, or `out` itself.
    pub fn encode(
        &self,
        payload: &[u8],
        out: &mut [u8],
        max_packet_size: usize,
    ) -> Result<usize, FrameError> {
        let len = HEADERS_LEN + payload.len();
        let max = max_packet_size.min(out.len());
        let dgram_len = u16::try_from(TRANSPORT_HEADER_LEN + payload.len()).ok();
        let Some(dgram_len) = dgram_len.filter(|_| len <= max) else {
            return Err(FrameError::ResponseTooLarge { len, max });
        };

        out[DST_ADDR..SRC_ADDR].copy_from_slice(&self.dst_addr.0);
        out[SRC_ADDR..ETHER_TYPE].copy_from_slice(&self.src_addr.0);
        put_u16(out, ETHER_TYPE, self.ether_type);
        put_u16(out, SRC_PORT, self.src_port);
        put_u16(out, DST_PORT, self.dst_port);
        put_u16(out, DGRAM_LEN, dgram_len);
        put_u16(out, CHECKSUM, 0);
        out[HEADERS_LEN..len].copy_from_slice(payload);

        Ok(len)
    }
}

/// Validates received frames and builds responses.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameCodec {
    config: CodecConfig,
}

impl FrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Validates `buf` and returns a view of its headers and payload.
    ///
    /// Checks run in wire order: header length, protocol tag, destination
    /// port, declared length.
    pub fn parse<'a>(&self, buf: &'a [u8]) -> Result<ParsedFrame<'a>, FrameError> {
        let malformed = || FrameError::Malformed {
            len: buf.len(),
            required: HEADERS_LEN,
        };
        if buf.len() < HEADERS_LEN {
            return Err(malformed());
        }

        let ether_type = be_u16(buf, ETHER_TYPE).ok_or_else(malformed)?;
        if ether_type != self.config.ether_type {
            return Err(FrameError::WrongProtocol {
                found: ether_type,
                expected: self.config.ether_type,
            });
        }

        let dst_port = be_u16(buf, DST_PORT).ok_or_else(malformed)?;
        if dst_port != self.config.listen_port {
            return Err(FrameError::WrongPort {
                found: dst_port,
                expected: self.config.listen_port,
            });
        }

        let dgram_len = be_u16(buf, DGRAM_LEN).ok_or_else(malformed)?;
        let declared = dgram_len as isize - TRANSPORT_HEADER_LEN as isize;
        let max = self.config.max_payload();
        let available = buf.len() - HEADERS_LEN;
        let payload = usize::try_from(declared)
            .ok()
            .filter(|&len| len > 0 && len <= max && len <= available)
            .and_then(|len| buf.get(HEADERS_LEN..HEADERS_LEN + len))
            .ok_or(FrameError::BadLength {
                declared,
                max,
                available,
            })?;

        Ok(ParsedFrame {
            dst_addr: HwAddr::read(buf, DST_ADDR).ok_or_else(malformed)?,
            src_addr: HwAddr::read(buf, SRC_ADDR).ok_or_else(malformed)?,
            ether_type,
            src_port: be_u16(buf, SRC_PORT).ok_or_else(malformed)?,
            dst_port,
            payload,
        })
    }

    /// Builds the reply to `original` carrying `payload` into `out`.
    ///
    /// Returns the number of bytes written.
    pub fn build_response(
        &self,
        original: &ParsedFrame<'_>,
        payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize, FrameError> {
        original
            .reply_header(self.config.response_ether_type)
            .encode(payload, out, self.config.max_packet_size)
    }
}
