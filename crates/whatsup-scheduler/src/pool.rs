//! Fetch worker pool — N long-lived workers draining one unbounded job queue.
//!
//! Workers only talk to the network. Results go back to the event loop as
//! [`Completion`]s; nothing here touches the repository or the transport.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::traits::Searcher;

use crate::jobs::{Completion, Job};
use crate::probe::Prober;

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolSnapshot {
    pub workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
}

struct WorkerContext {
    prober: Arc<dyn Prober>,
    searcher: Option<Arc<dyn Searcher>>,
    completions: mpsc::UnboundedSender<Completion>,
    stats: Arc<PoolStats>,
}

/// Handle for submitting jobs. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    stats: Arc<PoolStats>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub fn start(
        workers: usize,
        prober: Arc<dyn Prober>,
        searcher: Option<Arc<dyn Searcher>>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());
        let ctx = Arc::new(WorkerContext {
            prober,
            searcher,
            completions,
            stats: stats.clone(),
        });

        for id in 0..workers {
            tracing::info!("🧵 Starting fetch worker {id}");
            tokio::spawn(worker_loop(id, queue.clone(), ctx.clone()));
        }

        Self { tx, stats, workers }
    }

    /// Queue a job. Fails only if every worker has exited.
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|e| WhatsupError::Other(format!("fetch pool is shut down, dropped {}", e.0.label())))?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> PoolSnapshot {
        PoolSnapshot {
            workers: self.workers,
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            panicked: self.stats.panicked.load(Ordering::Relaxed),
        }
    }
}

async fn worker_loop(id: usize, queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>, ctx: Arc<WorkerContext>) {
    loop {
        // Hold the lock only while waiting, so workers pick jobs one at a time.
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!("Fetch worker {id} stopping: queue closed");
            return;
        };

        let label = job.label();
        match AssertUnwindSafe(run_job(&ctx, job)).catch_unwind().await {
            Ok(completion) => {
                ctx.stats.completed.fetch_add(1, Ordering::Relaxed);
                if ctx.completions.send(completion).is_err() {
                    tracing::debug!("Fetch worker {id}: event loop gone, dropped result of {label}");
                }
            }
            Err(panic) => {
                ctx.stats.panicked.fetch_add(1, Ordering::Relaxed);
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!("❌ Fetch worker {id}: {label} panicked: {reason}");
            }
        }
    }
}

async fn run_job(ctx: &WorkerContext, job: Job) -> Completion {
    match job {
        Job::Probe { url, followup } => {
            let response = ctx.prober.fetch(&url).await;
            Completion::Probe {
                url,
                followup,
                response,
            }
        }
        Job::Search {
            jid,
            query,
            max_results,
        } => {
            let outcome = match &ctx.searcher {
                Some(searcher) => searcher
                    .search(&query, max_results)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("search is not configured".to_string()),
            };
            Completion::Search {
                jid,
                query,
                outcome,
            }
        }
    }
}
