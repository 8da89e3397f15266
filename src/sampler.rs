//! Parallel rejection sampling of points inside a region.
//!
//! The requested count is split across a fixed set of workers running on
//! tokio's blocking pool. Worker `i` draws from its own RNG seeded with
//! `seed + i` and shares nothing mutable with its siblings: it reports
//! accepted-point counts on a bounded progress channel and hands its points
//! back through its join handle.
//!
//! Results are concatenated in worker completion order, so only the points
//! produced by each worker are reproducible for a fixed seed and worker
//! count, not the order of the final set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use geo::Point;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::generate_point::{Draw, random_point_in_region};
use crate::point_set::PointSet;
use crate::region::ContainmentOracle;

/// Errors that abort a sampling run.
#[derive(Debug, Error)]
pub enum SamplingError {
    /// A worker hit its rejection or wall-clock budget.
    #[error(
        "Worker {worker} stalled with {accepted}/{target} points after {draws} draws; \
         the region fills too little of its bounding box"
    )]
    Stalled {
        worker: usize,
        accepted: usize,
        target: usize,
        draws: u64,
    },

    /// A worker panicked or could not be joined.
    #[error("Worker {worker} failed: {message}")]
    WorkerFailed { worker: usize, message: String },

    #[error("Sampling cancelled")]
    Cancelled,
}

/// Tunables for [`Sampler`].
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of workers; `0` means the available parallelism
    pub workers: usize,
    /// Consecutive rejected draws after which a worker reports a stall
    pub max_draws_per_point: u64,
    /// Wall-clock budget per worker
    pub worker_deadline: Option<Duration>,
    /// Accepted points between progress reports
    pub progress_every: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_draws_per_point: 1_000_000,
            worker_deadline: None,
            progress_every: 64,
        }
    }
}

impl SamplerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Resolves `workers == 0` to the machine's available parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// What one worker produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    pub worker: usize,
    pub seed: u64,
    pub points: Vec<Point<f64>>,
    pub draws: u64,
}

/// Splits `count` into `workers` shares; the first `count % workers` get one extra.
pub fn worker_shares(count: usize, workers: usize) -> Vec<usize> {
    let workers = workers.max(1);
    let base = count / workers;
    let remainder = count % workers;
    (0..workers)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

pub struct Sampler {
    config: SamplerConfig,
    cancel: CancellationToken,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to stop all workers from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Samples exactly `count` points strictly inside `oracle`.
    pub async fn sample<O>(
        &self,
        oracle: Arc<O>,
        count: usize,
        seed: u64,
    ) -> Result<PointSet, SamplingError>
    where
        O: ContainmentOracle + 'static,
    {
        self.sample_with_progress(oracle, count, seed, |_| {}).await
    }

    /// Like [`Sampler::sample`], calling `on_progress` with the running total
    /// of accepted points as workers report in.
    pub async fn sample_with_progress<O, F>(
        &self,
        oracle: Arc<O>,
        count: usize,
        seed: u64,
        on_progress: F,
    ) -> Result<PointSet, SamplingError>
    where
        O: ContainmentOracle + 'static,
        F: FnMut(usize),
    {
        let crs = oracle.crs();
        let outputs = self.sample_workers(oracle, count, seed, on_progress).await?;

        let points: Vec<Point<f64>> = outputs.into_iter().flat_map(|o| o.points).collect();
        debug_assert_eq!(points.len(), count);

        Ok(PointSet::new(points, crs, Some(seed)))
    }

    /// Runs the workers and returns their outputs in completion order.
    ///
    /// Every worker is joined before this returns, including when one of them
    /// fails; the remaining ones are cancelled in that case.
    pub async fn sample_workers<O, F>(
        &self,
        oracle: Arc<O>,
        count: usize,
        seed: u64,
        mut on_progress: F,
    ) -> Result<Vec<WorkerOutput>, SamplingError>
    where
        O: ContainmentOracle + 'static,
        F: FnMut(usize),
    {
        if self.cancel.is_cancelled() {
            return Err(SamplingError::Cancelled);
        }

        let workers = self.config.effective_workers();
        let shares = worker_shares(count, workers);
        let run_token = self.cancel.child_token();
        let (progress_tx, mut progress_rx) = mpsc::channel::<usize>(workers * 4);

        info!(
            count = count,
            workers = workers,
            seed = seed,
            "Starting rejection sampling"
        );

        let mut handles = FuturesUnordered::new();
        for (worker, target) in shares.into_iter().enumerate() {
            let job = WorkerJob {
                worker,
                target,
                seed: seed.wrapping_add(worker as u64),
                max_draws: self.config.max_draws_per_point,
                deadline: self.config.worker_deadline,
                progress_every: self.config.progress_every.max(1),
            };
            debug!(worker = worker, points = target, seed = job.seed, "Spawning worker");

            let oracle = Arc::clone(&oracle);
            let progress = progress_tx.clone();
            let token = run_token.clone();
            let handle =
                tokio::task::spawn_blocking(move || job.run(oracle.as_ref(), &progress, &token));
            handles.push(async move { (worker, handle.await) });
        }
        drop(progress_tx);

        let mut completed = 0usize;
        let mut outputs = Vec::with_capacity(workers);
        let mut failure: Option<SamplingError> = None;
        let mut progress_open = true;

        while progress_open || !handles.is_empty() {
            tokio::select! {
                report = progress_rx.recv(), if progress_open => match report {
                    Some(n) => {
                        completed += n;
                        on_progress(completed);
                    }
                    None => progress_open = false,
                },
                Some((worker, joined)) = handles.next(), if !handles.is_empty() => {
                    let result = joined.unwrap_or_else(|e| {
                        Err(SamplingError::WorkerFailed {
                            worker,
                            message: e.to_string(),
                        })
                    });
                    match result {
                        Ok(output) => {
                            debug!(
                                worker = worker,
                                points = output.points.len(),
                                draws = output.draws,
                                "Worker finished"
                            );
                            outputs.push(output);
                        }
                        Err(e) => {
                            if failure.is_none() {
                                warn!(worker = worker, error = %e, "Worker failed, cancelling the rest");
                                run_token.cancel();
                                failure = Some(e);
                            }
                        }
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        info!(points = completed, "Rejection sampling complete");
        Ok(outputs)
    }
}

/// Samples `count` points with the default configuration.
pub async fn sample<O>(oracle: Arc<O>, count: usize, seed: u64) -> Result<PointSet, SamplingError>
where
    O: ContainmentOracle + 'static,
{
    Sampler::new(SamplerConfig::default())
        .sample(oracle, count, seed)
        .await
}

struct WorkerJob {
    worker: usize,
    target: usize,
    seed: u64,
    max_draws: u64,
    deadline: Option<Duration>,
    progress_every: usize,
}

impl WorkerJob {
    fn run<O: ContainmentOracle + ?Sized>(
        self,
        oracle: &O,
        progress: &mpsc::Sender<usize>,
        cancel: &CancellationToken,
    ) -> Result<WorkerOutput, SamplingError> {
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut points = Vec::with_capacity(self.target);
        let mut draws = 0u64;
        let mut unreported = 0usize;

        let deadline = self.deadline;
        let interrupted =
            || cancel.is_cancelled() || deadline.is_some_and(|d| started.elapsed() > d);

        while points.len() < self.target {
            let point = match random_point_in_region(
                &mut rng,
                oracle,
                self.max_draws,
                &mut draws,
                interrupted,
            ) {
                Draw::Accepted(point) => point,
                Draw::Interrupted if cancel.is_cancelled() => return Err(SamplingError::Cancelled),
                Draw::Interrupted | Draw::Exhausted => {
                    return Err(SamplingError::Stalled {
                        worker: self.worker,
                        accepted: points.len(),
                        target: self.target,
                        draws,
                    });
                }
            };

            points.push(point);
            unreported += 1;
            if unreported >= self.progress_every {
                // A closed channel only means nobody is listening any more
                let _ = progress.blocking_send(unreported);
                unreported = 0;
            }
        }

        if unreported > 0 {
            let _ = progress.blocking_send(unreported);
        }

        Ok(WorkerOutput {
            worker: self.worker,
            seed: self.seed,
            points,
            draws,
        })
    }
}
