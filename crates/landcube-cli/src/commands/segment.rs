//! Segment command implementation

use super::{build_query, display_report, ensure_complete, run_interruptible, CommandContext};
use crate::cli::SegmentArgs;
use crate::output_types::RunOutput;
use anyhow::Result;
use chrono::{Datelike, Utc};
use landcube_core::error::LandcubeError;
use landcube_core::models::Crs;
use landcube_pipeline::SegmentJob;

pub async fn execute(args: SegmentArgs, ctx: &CommandContext) -> Result<()> {
    let query = build_query(&args.query)?;
    let crs_out = args.crs_out.as_deref().map(Crs::parse).transpose().map_err(LandcubeError::from)?;
    let year = args
        .year
        .or(args.query.from.map(|d| d.year()))
        .unwrap_or_else(|| Utc::now().year());

    let job = SegmentJob {
        name: args.name,
        datasource: args.query.product.clone(),
        year,
        algorithm: args.algorithm,
        params: args.params,
        bands: args.bands,
        crs_out,
    };

    let (pipeline, progress) = ctx.tracked_pipeline(&query, &format!("Segmenting into {}", job.name)).await?;
    let report = match run_interruptible(&pipeline, pipeline.segment(&query, &job)).await {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    progress.finish(&report);

    let output = &ctx.output;
    if output.is_json() {
        output.result(RunOutput { command: "segment".to_string(), output: job.name.clone(), report: report.clone() })?;
    } else {
        output.success(format!(
            "Segmented {} tiles with {}, stored as '{}'",
            report.success_count(),
            job.algorithm,
            job.name
        ));
        display_report(output, &report);
    }

    ensure_complete(&report)
}
