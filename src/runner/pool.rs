//! Bounded worker pool for parallel runs.
//!
//! Run contexts are pushed into a bounded job channel shared by a fixed set
//! of worker tasks. Each worker pulls the next context, executes it under the
//! run policy and sends the outcome back on a result channel. Outcomes arrive
//! in completion order; the executor restores index order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::benchmark::Benchmark;
use super::executor::RunPolicy;
use super::outcome::{RunContext, RunOutcome};

/// Statistics about a finished pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of workers spawned.
    pub num_workers: usize,
    /// Workers still executing a run when the stats were taken.
    pub active_workers: usize,
    /// Runs that finished with `success == true`.
    pub runs_succeeded: u64,
    /// Runs that failed, crashed or timed out.
    pub runs_failed: u64,
    /// Highest number of runs observed in flight at once.
    pub peak_active: usize,
    /// Average run duration.
    pub average_run_duration: Duration,
}

impl PoolStats {
    /// Total number of runs processed.
    pub fn total_processed(&self) -> u64 {
        self.runs_succeeded + self.runs_failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.runs_succeeded as f64 / total as f64) * 100.0
    }
}

struct SharedPoolStats {
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
    peak_active: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            peak_active: AtomicU64::new(0),
        }
    }

    fn record(&self, success: bool, duration: Duration) {
        if success {
            self.runs_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.runs_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        let now = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let succeeded = self.runs_succeeded.load(Ordering::SeqCst);
        let failed = self.runs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let total = succeeded + failed;

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            runs_succeeded: succeeded,
            runs_failed: failed,
            peak_active: self.peak_active.load(Ordering::SeqCst) as usize,
            average_run_duration: if total > 0 {
                Duration::from_millis(total_duration_ms / total)
            } else {
                Duration::ZERO
            },
        }
    }
}

/// Fixed-size pool executing run contexts concurrently.
pub struct WorkerPool {
    num_workers: usize,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    /// Creates a pool with `num_workers` workers (at least one).
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            stats: Arc::new(SharedPoolStats::new()),
        }
    }

    /// Number of workers spawned per batch.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.num_workers)
    }

    /// Executes every context and returns outcomes in completion order.
    ///
    /// The second value is `true` when `batch_timeout` elapsed first; any
    /// runs still in flight are aborted and missing from the result. Outcomes
    /// already sent by a worker when the timeout fires are kept.
    pub async fn run_all(
        &self,
        benchmark: Arc<dyn Benchmark>,
        policy: RunPolicy,
        jobs: Vec<RunContext>,
        batch_timeout: Duration,
    ) -> (Vec<RunOutcome>, bool) {
        let total = jobs.len();
        let policy = Arc::new(policy);
        let (job_tx, job_rx) = mpsc::channel::<RunContext>(self.num_workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<RunOutcome>(total.max(1));

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.num_workers + 1);

        for i in 0..self.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                jobs: Arc::clone(&job_rx),
                results: result_tx.clone(),
                benchmark: Arc::clone(&benchmark),
                policy: Arc::clone(&policy),
                stats: Arc::clone(&self.stats),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        drop(result_tx);

        handles.push(tokio::spawn(async move {
            for job in jobs {
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        }));

        info!(num_workers = self.num_workers, runs = total, "Worker pool started");

        let mut outcomes = Vec::with_capacity(total);
        let collect = async {
            while let Some(outcome) = result_rx.recv().await {
                outcomes.push(outcome);
            }
        };
        let timed_out = tokio::time::timeout(batch_timeout, collect).await.is_err();

        if timed_out {
            warn!(
                completed = outcomes.len(),
                runs = total,
                timeout_secs = batch_timeout.as_secs_f64(),
                "Batch timeout exceeded, aborting remaining runs"
            );
            for handle in &handles {
                handle.abort();
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!(error = %e, "Worker task panicked");
                }
            }
        }

        if timed_out {
            let kept = drain_ready(&mut result_rx, &mut outcomes);
            if kept > 0 {
                debug!(kept, "Kept outcomes delivered before the batch timeout");
            }
        }

        debug!(completed = outcomes.len(), runs = total, "Worker pool drained");
        (outcomes, timed_out)
    }
}

/// Moves every outcome already queued on `rx` into `into` without waiting.
fn drain_ready(rx: &mut mpsc::Receiver<RunOutcome>, into: &mut Vec<RunOutcome>) -> usize {
    let before = into.len();
    while let Ok(outcome) = rx.try_recv() {
        into.push(outcome);
    }
    into.len() - before
}

struct Worker {
    id: String,
    jobs: Arc<Mutex<mpsc::Receiver<RunContext>>>,
    results: mpsc::Sender<RunOutcome>,
    benchmark: Arc<dyn Benchmark>,
    policy: Arc<RunPolicy>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            let next = { self.jobs.lock().await.recv().await };
            let Some(ctx) = next else {
                break;
            };

            let run_index = ctx.run_index;
            let start = Instant::now();
            self.stats.increment_active();
            let outcome = self.policy.execute(self.benchmark.as_ref(), ctx).await;
            self.stats.decrement_active();
            self.stats.record(outcome.success, start.elapsed());

            debug!(
                worker_id = %self.id,
                run_index,
                success = outcome.success,
                "Worker finished run"
            );

            if self.results.send(outcome).await.is_err() {
                break;
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchmarkError;
    use crate::runner::benchmark::FnBenchmark;
    use crate::runner::config::MultiRunConfig;
    use crate::runner::outcome::BenchmarkOutput;
    use serde_json::Map;

    fn contexts(n: usize) -> Vec<RunContext> {
        (0..n)
            .map(|i| RunContext {
                run_index: i,
                num_runs: n,
                seed: 100 + i as u64,
                temperature: None,
                framework: "crewai".to_string(),
                task: "t".to_string(),
                attempt: 1,
                params: Map::new(),
            })
            .collect()
    }

    fn policy() -> RunPolicy {
        RunPolicy::from_config(
            &MultiRunConfig::new(1)
                .with_timeout(Duration::from_secs(5))
                .with_max_retries(0),
        )
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            num_workers: 4,
            active_workers: 0,
            runs_succeeded: 3,
            runs_failed: 1,
            peak_active: 4,
            average_run_duration: Duration::from_secs(2),
        };
        assert_eq!(stats.total_processed(), 4);
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();
        stats.increment_active();
        stats.increment_active();
        stats.decrement_active();
        stats.record(true, Duration::from_secs(10));
        stats.record(false, Duration::from_secs(20));

        let snapshot = stats.to_pool_stats(2);
        assert_eq!(snapshot.active_workers, 1);
        assert_eq!(snapshot.peak_active, 2);
        assert_eq!(snapshot.runs_succeeded, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.average_run_duration, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_pool_runs_every_job() {
        let bench: Arc<dyn Benchmark> = Arc::new(FnBenchmark::new(|ctx: RunContext| async move {
            Ok::<_, BenchmarkError>(BenchmarkOutput::success().with_tokens(ctx.seed))
        }));

        let pool = WorkerPool::new(3);
        let (mut outcomes, timed_out) = pool
            .run_all(bench, policy(), contexts(7), Duration::from_secs(10))
            .await;

        assert!(!timed_out);
        outcomes.sort_by_key(|o| o.run_index);
        assert_eq!(outcomes.len(), 7);
        assert_eq!(outcomes[6].tokens_used, Some(106));

        let stats = pool.stats();
        assert_eq!(stats.total_processed(), 7);
        assert!(stats.peak_active <= 3);
        assert_eq!(stats.active_workers, 0);
    }

    #[tokio::test]
    async fn test_pool_batch_timeout_returns_partial() {
        let bench: Arc<dyn Benchmark> = Arc::new(FnBenchmark::new(|ctx: RunContext| async move {
            if ctx.run_index > 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok::<_, BenchmarkError>(BenchmarkOutput::success())
        }));

        let pool = WorkerPool::new(2);
        let (outcomes, timed_out) = pool
            .run_all(bench, policy(), contexts(3), Duration::from_millis(200))
            .await;

        assert!(timed_out);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].run_index, 0);
    }

    #[tokio::test]
    async fn test_drain_ready_keeps_queued_outcomes() {
        let (tx, mut rx) = mpsc::channel::<RunOutcome>(4);
        let policy = policy();
        let bench = FnBenchmark::new(|_ctx: RunContext| async move {
            Ok::<_, BenchmarkError>(BenchmarkOutput::success())
        });
        for ctx in contexts(3).into_iter().skip(1) {
            tx.send(policy.execute(&bench, ctx).await).await.unwrap();
        }

        let mut outcomes = Vec::new();
        assert_eq!(drain_ready(&mut rx, &mut outcomes), 2);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].run_index, 1);
        assert_eq!(outcomes[1].run_index, 2);

        // Nothing queued: returns immediately even with the sender alive.
        assert_eq!(drain_ready(&mut rx, &mut outcomes), 0);
        drop(tx);
    }
}
