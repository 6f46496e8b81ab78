#![doc = include_str!("../README.md")]

mod error;
pub mod frame;
pub mod io;
pub mod payload;
pub mod tokenizer;
pub mod vocab;
pub mod worker;

pub use crate::error::*;
pub use crate::frame::{CodecConfig, FrameCodec, FrameError, FrameHeader, HwAddr, ParsedFrame};
pub use crate::io::{IoError, PacketBuf, PacketPool, PacketQueue};
pub use crate::payload::{PayloadError, PayloadFormat};
pub use crate::tokenizer::{Batch, TokenId, TokenSequence, TokenizeError, Tokenizer, TokenizerConfig};
pub use crate::vocab::{LoadError, Vocabulary, VocabularyCell};
pub use crate::worker::{
    DispatchError, Dispatcher, DropReason, PacketError, StatsSnapshot, Worker, WorkerConfig,
    WorkerStats,
};
