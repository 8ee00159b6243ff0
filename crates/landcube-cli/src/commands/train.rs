//! Train command implementation

use super::{build_query, display_report, ensure_complete, run_interruptible, CommandContext};
use crate::cli::TrainArgs;
use crate::output_types::TrainOutput;
use anyhow::Result;
use landcube_core::config::parse_statistics;
use landcube_core::models::{ExtractionMode, TemporalReducer};
use landcube_features::{CategoricalColumn, TableOptions};
use landcube_pipeline::TrainJob;

pub async fn execute(args: TrainArgs, ctx: &CommandContext) -> Result<()> {
    let query = build_query(&args.query)?;

    let mode: ExtractionMode = args.mode.parse()?;
    let stats = match &args.stats {
        Some(raw) => parse_statistics(raw)?,
        None => ctx.config.statistics.value.clone(),
    };
    let recipe = args.recipe.as_deref().map(str::parse::<TemporalReducer>).transpose()?;

    let job = TrainJob {
        model_name: args.name,
        training_set: args.training_set,
        algorithm: args.algorithm,
        params: args.params,
        options: TableOptions {
            mode,
            stats,
            categorical: args.categorical.iter().map(CategoricalColumn::attribute).collect(),
            layers: None,
            background: ctx.config.background.value,
        },
        recipe,
    };

    let (pipeline, progress) = ctx.tracked_pipeline(&query, &format!("Training {}", job.model_name)).await?;
    let outcome = match run_interruptible(&pipeline, pipeline.train(&query, &job)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    progress.finish(&outcome.report);

    let output = &ctx.output;
    if output.is_json() {
        output.result(TrainOutput {
            model: outcome.model,
            training_rows: outcome.training_rows,
            training_accuracy: outcome.training_accuracy,
            report: outcome.report.clone(),
        })?;
    } else {
        output.success(format!("Model '{}' trained and stored", outcome.model.name));
        output.section("Model");
        output.kv("Algorithm", &outcome.model.algorithm);
        output.kv("Training Set", &outcome.model.training_set);
        output.kv("Features", outcome.model.n_features);
        output.kv("Classes", outcome.model.n_classes);
        output.kv("Training Rows", outcome.training_rows);
        output.kv("Training Accuracy", format!("{:.3}", outcome.training_accuracy.accuracy));
        output.kv("Kappa", format!("{:.3}", outcome.training_accuracy.kappa));
        display_report(output, &outcome.report);
    }

    ensure_complete(&outcome.report)
}
