//! Models command implementation

use super::CommandContext;
use crate::output_types::ModelRow;
use anyhow::Result;

pub async fn execute(ctx: &CommandContext) -> Result<()> {
    let models = ctx.storage.store.list_models().await?;
    let rows: Vec<ModelRow> = models.iter().map(ModelRow::from).collect();

    let output = &ctx.output;
    if output.is_json() {
        output.result(rows)?;
    } else {
        output.section("Stored Models");
        output.table(rows);
    }
    Ok(())
}
