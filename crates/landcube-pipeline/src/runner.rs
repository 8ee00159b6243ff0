//! Worker pool running one task per tile.
//!
//! Tiles are pulled lazily from their iterator and dispatched in enumeration
//! order to at most `workers` concurrent tasks; they complete in any order.
//! Each tile's error is caught here and turned into a `TileFailure`, except
//! for cross-cutting errors which stop the run.

use crate::report::RunReport;
use crate::stage::{TileFailure, TileStage};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{Tile, TileKey};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::Instrument;

/// Owner side of the cancellation flag
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop dispatching tiles and interrupt in-flight ones at their next stage
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken { rx: self.tx.subscribe() }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the cancellation flag
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Handle dropped without cancelling
            std::future::pending::<()>().await;
        }
    }
}

/// Stage bookkeeping and cancellation checks for one tile
#[derive(Debug)]
pub struct TileContext {
    tile: Tile,
    stage: TileStage,
    cancel: CancelToken,
}

impl TileContext {
    pub fn new(tile: Tile, cancel: CancelToken) -> Self {
        Self { tile, stage: TileStage::Pending, cancel }
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    pub fn key(&self) -> &TileKey {
        &self.tile.key
    }

    pub fn stage(&self) -> TileStage {
        self.stage
    }

    /// Move to `stage`, failing with `Cancelled` if the run was cancelled
    pub fn enter(&mut self, stage: TileStage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LandcubeError::Cancelled);
        }
        debug_assert!(self.stage.can_advance_to(stage), "{} -> {}", self.stage, stage);
        tracing::debug!(from = %self.stage, to = %stage, "Stage transition");
        self.stage = stage;
        Ok(())
    }

    /// Await `fut` unless cancellation arrives first
    ///
    /// Only for reads; persistence is never interrupted midway.
    pub async fn interruptible<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LandcubeError::Cancelled),
            result = fut => result,
        }
    }

    fn finish(&mut self) {
        self.stage = TileStage::Done;
    }
}

/// Run CPU-bound work on the blocking pool
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LandcubeError::Worker(e.to_string()))?
}

/// Work done for one tile
#[async_trait]
pub trait TileTask: Send + Sync {
    type Output: Send + 'static;

    /// Process one tile, calling `ctx.enter` before each stage
    async fn run(&self, ctx: &mut TileContext) -> Result<Self::Output>;
}

/// Callback invoked as each tile completes
pub type ProgressFn = Arc<dyn Fn(&TileKey, TileStatus) + Send + Sync>;

/// How a tile ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    Succeeded,
    Failed,
    Cancelled,
}

enum TileResult<O> {
    Done(O),
    Failed(TileFailure, LandcubeError),
    Cancelled(TileStage),
}

struct TileRun<O> {
    seq: usize,
    key: TileKey,
    result: TileResult<O>,
}

/// Result of a run: the report plus successful outputs in enumeration order
#[derive(Debug)]
pub struct RunOutcome<O> {
    pub report: RunReport,
    pub outputs: Vec<(TileKey, O)>,
    /// Error that aborted the run, if any
    pub fatal: Option<LandcubeError>,
}

impl<O> RunOutcome<O> {
    /// Fail with the aborting error, if any
    pub fn check_fatal(&mut self) -> Result<()> {
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Bounded worker pool over a lazy tile sequence
#[derive(Clone)]
pub struct Runner {
    workers: usize,
    cancel: CancelHandle,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("workers", &self.workers)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Runner {
    pub fn new(workers: usize, cancel: CancelHandle) -> Self {
        Self { workers: workers.max(1), cancel, progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Run `task` over every tile and collect the outcome
    pub async fn run<T, I>(&self, tiles: I, task: Arc<T>) -> RunOutcome<T::Output>
    where
        T: TileTask + 'static,
        I: IntoIterator<Item = Tile>,
    {
        let started = Instant::now();
        let mut report = RunReport::new();
        let mut outputs = Vec::new();
        let mut fatal: Option<LandcubeError> = None;

        let mut results = stream::iter(tiles.into_iter().enumerate())
            .map(|(seq, tile)| run_tile(seq, tile, task.clone(), self.cancel.token()))
            .buffer_unordered(self.workers);

        while let Some(run) = results.next().await {
            let status = match run.result {
                TileResult::Done(output) => {
                    report.add_success(run.key.clone());
                    outputs.push((run.seq, run.key.clone(), output));
                    TileStatus::Succeeded
                }
                TileResult::Failed(failure, err) => {
                    if err.is_fatal_to_run() && fatal.is_none() {
                        tracing::error!(tile = %run.key, error = %err, "Aborting run");
                        report.aborted = Some(err.to_string());
                        fatal = Some(err);
                        self.cancel.cancel();
                    }
                    report.add_failure(failure);
                    TileStatus::Failed
                }
                TileResult::Cancelled(stage) => {
                    report.add_cancelled(run.key.clone(), stage);
                    TileStatus::Cancelled
                }
            };
            if let Some(progress) = &self.progress {
                progress(&run.key, status);
            }
        }

        report.finish(started.elapsed());
        outputs.sort_by_key(|(seq, _, _)| *seq);

        tracing::info!(
            tiles = report.total_tiles,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            cancelled = report.cancelled_count(),
            elapsed_secs = report.elapsed_secs,
            "Run finished"
        );

        RunOutcome {
            report,
            outputs: outputs.into_iter().map(|(_, key, output)| (key, output)).collect(),
            fatal,
        }
    }
}

async fn run_tile<T: TileTask>(seq: usize, tile: Tile, task: Arc<T>, cancel: CancelToken) -> TileRun<T::Output> {
    let key = tile.key.clone();
    let span = tracing::info_span!("tile", tile = %key);

    async move {
        let mut ctx = TileContext::new(tile, cancel);
        if ctx.cancel.is_cancelled() {
            return TileRun { seq, key, result: TileResult::Cancelled(TileStage::Pending) };
        }

        let result = match task.run(&mut ctx).await {
            Ok(output) => {
                ctx.finish();
                tracing::debug!("Tile done");
                TileResult::Done(output)
            }
            Err(LandcubeError::Cancelled) => {
                tracing::debug!(stage = %ctx.stage(), "Tile cancelled");
                TileResult::Cancelled(ctx.stage())
            }
            Err(err) => {
                let failure = TileFailure::new(key.clone(), ctx.stage(), &err);
                if err.is_recoverable() {
                    tracing::warn!(stage = %ctx.stage(), kind = %failure.kind, error = %err, "Tile skipped");
                } else {
                    tracing::error!(stage = %ctx.stage(), kind = %failure.kind, error = %err, "Tile failed");
                }
                TileResult::Failed(failure, err)
            }
        };
        TileRun { seq, key, result }
    }
    .instrument(span)
    .await
}
