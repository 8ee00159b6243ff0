//! Predict command implementation

use super::{build_query, display_report, ensure_complete, run_interruptible, CommandContext};
use crate::cli::PredictArgs;
use crate::output_types::RunOutput;
use anyhow::Result;
use landcube_pipeline::{ObjectSource, PredictJob};

fn object_source(args: &PredictArgs) -> ObjectSource {
    if let Some(segmentation) = &args.segmentation {
        ObjectSource::Stored { segmentation: segmentation.clone() }
    } else if args.pixels {
        ObjectSource::Pixels
    } else {
        ObjectSource::Segment {
            algorithm: args.algorithm.clone(),
            params: args.params.clone(),
            bands: args.bands.clone(),
        }
    }
}

pub async fn execute(args: PredictArgs, ctx: &CommandContext) -> Result<()> {
    let query = build_query(&args.query)?;
    let job = PredictJob { model_name: args.model.clone(), objects: object_source(&args), output: args.output };

    let (pipeline, progress) = ctx.tracked_pipeline(&query, &format!("Classifying with {}", job.model_name)).await?;
    let report = match run_interruptible(&pipeline, pipeline.predict(&query, &job)).await {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    progress.finish(&report);

    let output = &ctx.output;
    if output.is_json() {
        output.result(RunOutput {
            command: "predict".to_string(),
            output: job.output_name().to_string(),
            report: report.clone(),
        })?;
    } else {
        output.success(format!(
            "Classified {} tiles, results saved as '{}'",
            report.success_count(),
            job.output_name()
        ));
        display_report(output, &report);
    }

    ensure_complete(&report)
}
