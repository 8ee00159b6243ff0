//! Command implementations

mod algorithms;
mod labels;
mod models;
mod predict;
mod segment;
mod tiles;
mod train;

use crate::cli::{Cli, Commands, QueryArgs};
use crate::config::load_config;
use crate::errors;
use crate::output::OutputWriter;
use crate::output_types::FailureRow;
use crate::progress::TileProgress;
use crate::storage::Storage;
use anyhow::{bail, Result};
use landcube_core::config::LayeredConfig;
use landcube_core::error::LandcubeError;
use landcube_core::models::{BoundingBox, Crs, Region, TimeRange};
use landcube_pipeline::{Pipeline, PipelineSettings, RunReport, TileQuery};
use std::future::Future;

/// What every command that touches the stores needs
pub struct CommandContext {
    pub output: OutputWriter,
    pub config: LayeredConfig,
    pub storage: Storage,
}

impl CommandContext {
    pub fn pipeline(&self) -> Result<Pipeline> {
        let settings = PipelineSettings::from_config(&self.config);
        Ok(Pipeline::new(self.storage.cube.clone(), self.storage.store.clone(), settings)?)
    }

    /// Pipeline reporting tile progress on a bar sized by planning the query
    pub async fn tracked_pipeline(&self, query: &TileQuery, message: &str) -> Result<(Pipeline, TileProgress)> {
        let pipeline = self.pipeline()?;
        let total = plan_tiles(&pipeline, query).await?;
        let progress = TileProgress::new(total as u64, message, self.output.is_json());
        Ok((pipeline.with_progress(progress.callback()), progress))
    }
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let output = OutputWriter::new(cli.json);
    let config = load_config(&cli)?;

    if let Commands::Algorithms = cli.command {
        return algorithms::execute(&output);
    }

    let storage = Storage::new(&config).await?;
    tracing::debug!(store = %storage.kind, workers = config.workers.value, "Storage ready");
    let ctx = CommandContext { output, config, storage };

    match cli.command {
        Commands::Train(args) => train::execute(args, &ctx).await,
        Commands::Predict(args) => predict::execute(args, &ctx).await,
        Commands::Segment(args) => segment::execute(args, &ctx).await,
        Commands::Tiles(args) => tiles::execute(args, &ctx).await,
        Commands::Models => models::execute(&ctx).await,
        Commands::Labels(args) => labels::execute(args, &ctx).await,
        Commands::Algorithms => algorithms::execute(&ctx.output),
    }
}

/// Turn the query flags into a tile query
pub fn build_query(args: &QueryArgs) -> Result<TileQuery> {
    let [min_x, min_y, max_x, max_y] = args.bbox[..] else {
        bail!("--bbox takes exactly four values: XMIN YMIN XMAX YMAX");
    };
    if [min_x, min_y, max_x, max_y].iter().any(|v| !v.is_finite()) {
        bail!("--bbox values must be finite numbers");
    }

    let crs = Crs::parse(&args.bbox_crs).map_err(LandcubeError::from)?;
    let region = Region::new(BoundingBox::new(min_x, min_y, max_x, max_y), crs);
    let mut query = TileQuery::new(&args.product, region);

    if let (Some(from), Some(to)) = (args.from, args.to) {
        query = query.with_time_range(TimeRange::new(from, to)?);
    }
    Ok(query)
}

/// Number of tiles a query plans to, with an unknown product reported as such
async fn plan_tiles(pipeline: &Pipeline, query: &TileQuery) -> Result<usize> {
    match pipeline.plan(query).await {
        Ok(plan) => Ok(plan.tile_count()),
        Err(LandcubeError::TileNotFound { .. }) => Err(errors::product_not_found(&query.product).into()),
        Err(e) => Err(e.into()),
    }
}

/// Drive a run, cancelling its remaining tiles on Ctrl-C
pub async fn run_interruptible<F: Future>(pipeline: &Pipeline, run: F) -> F::Output {
    let handle = pipeline.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling remaining tiles");
            handle.cancel();
        }
    });

    let result = run.await;
    watcher.abort();
    result
}

/// Run summary in human mode
pub fn display_report(output: &OutputWriter, report: &RunReport) {
    output.section("Run Summary");
    output.kv("Tiles", report.total_tiles);
    output.kv("Succeeded", report.success_count());
    output.kv("Failed", report.failure_count());
    output.kv("Cancelled", report.cancelled_count());
    output.kv("Elapsed", format!("{:.1}s", report.elapsed_secs));

    if !report.failed.is_empty() {
        output.section("Failed Tiles");
        output.table(report.failed.iter().map(FailureRow::from).collect());
    }
    if let Some(reason) = &report.aborted {
        output.error(format!("Run aborted: {}", reason));
    }
}

/// Fail the command when any tile did not complete
pub fn ensure_complete(report: &RunReport) -> Result<()> {
    if report.all_succeeded() {
        Ok(())
    } else {
        Err(errors::run_incomplete(report).into())
    }
}
