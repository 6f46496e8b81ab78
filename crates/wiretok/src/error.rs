//! Crate-wide error type.
//!
//! Every fallible stage of the request path has its own error enum so callers
//! can match on the precise failure. [`Error`] unifies them for callers that
//! drive more than one stage. The per-packet subset a
//! [`Worker`](crate::Worker) can hit is [`PacketError`], which maps onto a
//! [`DropReason`](crate::DropReason).
//!
//! ## Error Cases
//! - `Load`: the vocabulary source was unreadable or malformed.
//! - `Frame`: a frame failed header validation or its response did not fit.
//! - `Tokenize`: a structured request had no usable `texts` container.
//! - `Payload`: the response payload could not be encoded.
//! - `Io`: a packet buffer was unavailable or a queue could not be opened.
//! - `Dispatch`: a worker thread could not be started or panicked.

use crate::{
    frame::FrameError, io::IoError, payload::PayloadError, tokenizer::TokenizeError,
    vocab::LoadError, worker::DispatchError, worker::PacketError,
};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the tokenization service core.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Vocabulary load failure. Fatal at startup.
    #[error("vocabulary error: {0}")]
    Load(#[from] LoadError),

    /// Per-packet header or length violation.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The request's batch container was missing or malformed.
    #[error("tokenize error: {0}")]
    Tokenize(#[from] TokenizeError),

    /// The response payload could not be encoded.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Packet buffer or queue failure.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Worker thread lifecycle failure.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl From<PacketError> for Error {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Frame(e) => Self::Frame(e),
            PacketError::Tokenize(e) => Self::Tokenize(e),
            PacketError::Payload(e) => Self::Payload(e),
            PacketError::Io(e) => Self::Io(e),
        }
    }
}
