//! Tiles command implementation

use super::{build_query, CommandContext};
use crate::cli::TilesArgs;
use crate::errors;
use crate::output_types::{TileRow, TilesOutput};
use anyhow::Result;
use landcube_core::error::LandcubeError;

pub async fn execute(args: TilesArgs, ctx: &CommandContext) -> Result<()> {
    let query = build_query(&args.query)?;
    let pipeline = ctx.pipeline()?;

    let plan = match pipeline.plan(&query).await {
        Ok(plan) => plan,
        Err(LandcubeError::TileNotFound { .. }) => return Err(errors::product_not_found(&query.product).into()),
        Err(e) => return Err(e.into()),
    };
    let tiles: Vec<TileRow> = plan.tiles().map(|tile| TileRow::from(&tile)).collect();

    let output = &ctx.output;
    if output.is_json() {
        output.result(TilesOutput {
            product: plan.product().to_string(),
            crs: plan.grid().crs.to_string(),
            level: plan.level(),
            max_tile_bytes: plan.max_tile_bytes(),
            tiles,
        })?;
    } else {
        output.section(format!("Tiles of {}", plan.product()));
        output.kv("Grid CRS", &plan.grid().crs);
        output.kv("Subdivision Level", plan.level());
        output.kv("Largest Tile", format!("{:.1} MiB", plan.max_tile_bytes() as f64 / (1024.0 * 1024.0)));
        output.kv("Count", tiles.len());
        output.table(tiles);
    }

    Ok(())
}
