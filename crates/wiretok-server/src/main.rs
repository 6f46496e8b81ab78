#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use core::time::Duration;
use server::config::{CliArgs, ServerConfig};
use server::telemetry::init_telemetry;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    signal,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use wiretok::{Dispatcher, PacketPool, Vocabulary, VocabularyCell, Worker, io::UdpTunnelQueue};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let vocabulary = Vocabulary::load(&config.vocab_path).with_context(|| {
        format!(
            "failed to load vocabulary from {}",
            config.vocab_path.display()
        )
    })?;
    tracing::info!(
        entries = vocabulary.len(),
        path = %config.vocab_path.display(),
        "Vocabulary loaded"
    );
    let vocab = Arc::new(VocabularyCell::new(vocabulary));

    let mut workers = Vec::with_capacity(usize::from(config.queues));
    for queue in 0..config.queues {
        let pool = PacketPool::new(config.pool_size, config.worker.codec.max_packet_size);
        let addr = config.queue_addr(queue);
        let device = UdpTunnelQueue::bind(queue, addr, pool.clone())
            .with_context(|| format!("failed to open queue {queue} on {addr}"))?
            .with_ether_type(config.worker.codec.ether_type);
        tracing::info!(queue, addr = ?device.local_addr().ok(), "Queue ready");
        workers.push(Worker::new(device, pool, Arc::clone(&vocab), &config.worker));
    }

    let dispatcher = Dispatcher::spawn(workers, CancellationToken::new())?;
    let outcome = run_until_shutdown(&dispatcher, &vocab, &config).await;

    tracing::info!("Shutdown signal received, stopping workers...");
    dispatcher.shutdown();
    let totals = tokio::task::spawn_blocking(move || dispatcher.join())
        .await
        .context("worker join task failed")??;
    tracing::info!(%totals, "Service shut down successfully");

    outcome
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting tokenization service with full config: {config:#?}");
    } else {
        tracing::info!(
            queues = config.queues,
            format = %config.worker.format,
            max_seq_len = config.worker.tokenizer.max_length,
            "Starting tokenization service"
        );
    }
    if config.oversubscribed() {
        tracing::warn!(
            queues = config.queues,
            cpus = num_cpus::get(),
            "More busy-polling queues than CPUs; workers will compete for cores"
        );
    }
}

/// Serves until SIGINT or SIGTERM, reloading the vocabulary on SIGHUP and
/// logging statistics on every tick.
async fn run_until_shutdown(
    dispatcher: &Dispatcher,
    vocab: &Arc<VocabularyCell>,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    let mut terminate = SignalListener::terminate()?;
    let mut hangup = SignalListener::hangup()?;

    let period = config.stats_interval.unwrap_or(Duration::from_secs(3600));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C signal");
                return Ok(());
            },
            () = terminate.recv() => {
                tracing::info!("Received SIGTERM signal");
                return Ok(());
            },
            () = hangup.recv() => {
                tracing::info!("Received SIGHUP signal, reloading vocabulary");
                reload_vocabulary(vocab, config.vocab_path.clone()).await;
            },
            _ = ticker.tick(), if config.stats_interval.is_some() => {
                log_stats(dispatcher);
            },
        }
    }
}

async fn reload_vocabulary(vocab: &VocabularyCell, path: PathBuf) {
    match tokio::task::spawn_blocking(move || Vocabulary::load(path)).await {
        Ok(Ok(vocabulary)) => {
            let entries = vocabulary.len();
            let generation = vocab.publish(vocabulary);
            tracing::info!(generation, entries, "Vocabulary reloaded");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Vocabulary reload failed, keeping the active vocabulary");
        }
        Err(e) => {
            tracing::error!(error = %e, "Vocabulary reload task failed");
        }
    }
}

fn log_stats(dispatcher: &Dispatcher) {
    tracing::info!(totals = %dispatcher.stats(), "Statistics");
    for (queue, stats) in dispatcher.per_worker_stats() {
        tracing::debug!(queue, %stats, "Queue statistics");
    }
}

/// One process signal; never fires on platforms without Unix signals.
struct SignalListener {
    #[cfg(unix)]
    inner: signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn install(kind: signal::unix::SignalKind, name: &str) -> anyhow::Result<Self> {
        let inner = signal::unix::signal(kind)
            .with_context(|| format!("failed to install {name} handler"))?;
        Ok(Self { inner })
    }

    fn terminate() -> anyhow::Result<Self> {
        Self::install(signal::unix::SignalKind::terminate(), "SIGTERM")
    }

    fn hangup() -> anyhow::Result<Self> {
        Self::install(signal::unix::SignalKind::hangup(), "SIGHUP")
    }

    async fn recv(&mut self) {
        if self.inner.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
impl SignalListener {
    fn terminate() -> anyhow::Result<Self> {
        Ok(Self {})
    }

    fn hangup() -> anyhow::Result<Self> {
        Ok(Self {})
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
