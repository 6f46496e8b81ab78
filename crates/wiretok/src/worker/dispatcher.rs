use super::{StatsSnapshot, Worker, WorkerStats};
use crate::io::PacketQueue;
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("failed to spawn worker for queue {queue}: {source}")]
    Spawn {
        queue: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for queue {queue} panicked")]
    WorkerPanicked { queue: u16 },
}

struct WorkerHandle {
    queue_id: u16,
    stats: Arc<WorkerStats>,
    thread: JoinHandle<StatsSnapshot>,
}

/// Owns the worker threads, one per queue.
///
/// Workers run until the shared [`CancellationToken`] is cancelled; there is
/// no other communication with them.
pub struct Dispatcher {
    handles: Vec<WorkerHandle>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Starts one named thread per worker.
    ///
    /// If any thread fails to start, the ones already running are stopped
    /// and joined before the error is returned.
    pub fn spawn<Q>(workers: Vec<Worker<Q>>, shutdown: CancellationToken) -> Result<Self, DispatchError>
    where
        Q: PacketQueue + 'static,
    {
        let mut dispatcher = Self {
            handles: Vec::with_capacity(workers.len()),
            shutdown,
        };

        for mut worker in workers {
            let queue_id = worker.queue_id();
            let stats = worker.stats();
            let token = dispatcher.shutdown.clone();

            let spawned = thread::Builder::new()
                .name(format!("wiretok-q{queue_id}"))
                .spawn(move || worker.run(&token));

            match spawned {
                Ok(thread) => dispatcher.handles.push(WorkerHandle {
                    queue_id,
                    stats,
                    thread,
                }),
                Err(source) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(queue = queue_id, error = %source, "failed to spawn worker");

                    dispatcher.abort();
                    return Err(DispatchError::Spawn {
                        queue: queue_id,
                        source,
                    });
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(workers = dispatcher.handles.len(), "workers started");

        Ok(dispatcher)
    }

    /// Live counters summed over every worker.
    pub fn stats(&self) -> StatsSnapshot {
        self.handles.iter().map(|h| h.stats.snapshot()).sum()
    }

    /// Live counters of each worker, keyed by queue id.
    pub fn per_worker_stats(&self) -> Vec<(u16, StatsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.queue_id, h.stats.snapshot()))
            .collect()
    }

    /// Asks every worker to stop after its current burst.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit and returns their final totals.
    ///
    /// Blocks until [`shutdown`](Self::shutdown) has been called. All
    /// workers are joined even if one of them panicked; the first panic is
    /// reported.
    pub fn join(self) -> Result<StatsSnapshot, DispatchError> {
        let mut total = StatsSnapshot::default();
        let mut panicked = None;

        for handle in self.handles {
            match handle.thread.join() {
                Ok(snapshot) => total += snapshot,
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(queue = handle.queue_id, "worker panicked");

                    total += handle.stats.snapshot();
                    panicked.get_or_insert(handle.queue_id);
                }
            }
        }

        match panicked {
            Some(queue) => Err(DispatchError::WorkerPanicked { queue }),
            None => Ok(total),
        }
    }

    /// Stops and joins every started worker, returning a panic among them.
    fn abort(self) -> Option<DispatchError> {
        self.shutdown();
        let failure = self.join().err();

        if let Some(_e) = &failure {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "worker failed while rolling back spawn");
        }

        failure
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.handles.len())
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}
