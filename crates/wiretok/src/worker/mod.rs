//! # Worker Dispatcher
//!
//! One [`Worker`] per device queue, each running a busy-polling loop on its
//! own thread:
//!
//! ```text
//! rx_burst ─▶ parse ─▶ tokenize ─▶ encode ─▶ build_response ─▶ tx_burst
//! ```
//!
//! A worker owns its queue, its buffer pool and its scratch space outright;
//! the only state shared between workers is the [`VocabularyCell`], read
//! once per burst. Received buffers are consumed by value, so every exit
//! path (success, drop or error) releases them back to the pool.
//!
//! [`Dispatcher`] starts the worker threads and joins them on shutdown.

mod dispatcher;
mod stats;

pub use dispatcher::{DispatchError, Dispatcher};
pub use stats::{DropReason, StatsSnapshot, WorkerStats};

use crate::{
    frame::{CodecConfig, FrameCodec, FrameError},
    io::{IoError, PacketBuf, PacketPool, PacketQueue},
    payload::{PayloadError, PayloadFormat},
    tokenizer::{Batch, TokenizeError, Tokenizer, TokenizerConfig},
    vocab::VocabularyCell,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BURST_SIZE: usize = 64;

/// Why one received packet could not be answered.
///
/// Every variant maps onto a [`DropReason`].
#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Settings shared by every worker of a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum buffers pulled per `rx_burst`.
    pub burst_size: usize,
    pub format: PayloadFormat,
    pub codec: CodecConfig,
    pub tokenizer: TokenizerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            burst_size: DEFAULT_BURST_SIZE,
            format: PayloadFormat::default(),
            codec: CodecConfig::default(),
            tokenizer: TokenizerConfig::default(),
        }
    }
}

/// The receive → tokenize → respond loop of one queue.
pub struct Worker<Q> {
    queue: Q,
    pool: PacketPool,
    codec: FrameCodec,
    format: PayloadFormat,
    burst_size: usize,
    vocab: Arc<VocabularyCell>,
    generation: u64,
    tokenizer: Tokenizer,
    stats: Arc<WorkerStats>,
    rx: Vec<PacketBuf>,
    tx: Vec<PacketBuf>,
    batch: Batch,
    scratch: Vec<u8>,
}

impl<Q: PacketQueue> Worker<Q> {
    /// Builds a worker for `queue`. Response buffers are drawn from `pool`.
    pub fn new(
        queue: Q,
        pool: PacketPool,
        vocab: Arc<VocabularyCell>,
        config: &WorkerConfig,
    ) -> Self {
        let (vocabulary, generation) = vocab.snapshot();
        let burst_size = config.burst_size.max(1);
        Self {
            queue,
            pool,
            codec: FrameCodec::new(config.codec),
            format: config.format,
            burst_size,
            vocab,
            generation,
            tokenizer: Tokenizer::new(vocabulary, config.tokenizer),
            stats: Arc::new(WorkerStats::new()),
            rx: Vec::with_capacity(burst_size),
            tx: Vec::with_capacity(burst_size),
            batch: Batch::new(),
            scratch: Vec::with_capacity(config.codec.max_packet_size),
        }
    }

    pub fn queue_id(&self) -> u16 {
        self.queue.queue_id()
    }

    /// Shared handle to this worker's counters.
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Polls until `shutdown` is cancelled.
    ///
    /// Cancellation is checked between bursts; the burst in progress is
    /// completed and every buffer it holds is released before returning.
    pub fn run(&mut self, shutdown: &CancellationToken) -> StatsSnapshot {
        #[cfg(feature = "tracing")]
        tracing::debug!(queue = self.queue_id(), "worker started");

        while !shutdown.is_cancelled() {
            if self.poll_once() == 0 {
                core::hint::spin_loop();
            }
        }

        let snapshot = self.stats.snapshot();

        #[cfg(feature = "tracing")]
        tracing::debug!(queue = self.queue_id(), %snapshot, "worker stopped");

        snapshot
    }

    /// Runs one receive/transmit cycle and returns the number of buffers
    /// received.
    pub fn poll_once(&mut self) -> usize {
        let mut rx = core::mem::take(&mut self.rx);
        let received = self.queue.rx_burst(&mut rx, self.burst_size);
        if received == 0 {
            self.rx = rx;
            return 0;
        }
        self.stats.record_rx(received);

        // After rx: a burst sees every vocabulary published before it arrived.
        self.refresh_vocabulary();

        for request in rx.drain(..) {
            self.handle(request);
        }
        self.rx = rx;

        self.flush();
        received
    }

    fn refresh_vocabulary(&mut self) {
        if self.vocab.generation() == self.generation {
            return;
        }
        let (vocabulary, generation) = self.vocab.snapshot();
        self.tokenizer.set_vocabulary(vocabulary);
        self.generation = generation;

        #[cfg(feature = "tracing")]
        tracing::debug!(queue = self.queue_id(), generation, "worker switched vocabulary");
    }

    fn handle(&mut self, request: PacketBuf) {
        match self.process(&request) {
            Ok(response) => self.tx.push(response),
            Err(e) => {
                let reason = DropReason::from(&e);
                self.stats.record_drop(reason);

                #[cfg(feature = "tracing")]
                tracing::trace!(queue = self.queue_id(), ?reason, error = %e, "dropped packet");
            }
        }
    }

    /// Builds the response to `request` in a fresh buffer.
    pub fn process(&mut self, request: &PacketBuf) -> Result<PacketBuf, PacketError> {
        let frame = self.codec.parse(request.as_slice())?;

        self.format
            .tokenize(&self.tokenizer, frame.payload, &mut self.batch)?;
        let rejected = self.batch.rejected();
        if rejected > 0 {
            self.stats.record_element_errors(rejected);
        }
        self.format.encode(&self.batch, &mut self.scratch)?;

        let mut response = self.pool.try_alloc()?;
        let (codec, payload) = (&self.codec, &self.scratch);
        response.fill_with(|out| codec.build_response(&frame, payload, out))?;
        Ok(response)
    }

    fn flush(&mut self) {
        if self.tx.is_empty() {
            return;
        }
        let accepted = self.queue.tx_burst(&mut self.tx);
        let failed = usize::try_from(self.queue.take_tx_dropped())
            .unwrap_or(usize::MAX)
            .min(accepted);
        self.stats.record_tx(accepted - failed);
        if failed > 0 {
            self.stats.record_tx_failed(failed);

            #[cfg(feature = "tracing")]
            tracing::trace!(queue = self.queue_id(), failed, "device discarded responses");
        }

        let rejected = self.tx.len();
        if rejected > 0 {
            self.stats.record_tx_rejected(rejected);
            self.tx.clear();

            #[cfg(feature = "tracing")]
            tracing::trace!(queue = self.queue_id(), rejected, "transmit burst partially rejected");
        }
    }
}

impl<Q> core::fmt::Debug for Worker<Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("burst_size", &self.burst_size)
            .field("format", &self.format)
            .field("generation", &self.generation)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
