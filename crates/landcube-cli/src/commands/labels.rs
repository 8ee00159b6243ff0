//! Labels command implementation

use super::CommandContext;
use crate::cli::{ImportArgs, LabelsArgs, LabelsCommand};
use crate::output_types::ImportOutput;
use anyhow::{bail, Context, Result};
use landcube_core::models::Polygon;
use landcube_geo::models::polygons_from_geojson;

pub async fn execute(args: LabelsArgs, ctx: &CommandContext) -> Result<()> {
    match args.command {
        LabelsCommand::Import(args) => import(args, ctx).await,
    }
}

/// Copy a class attribute into the class code of every polygon that has one
fn apply_class_attribute(polygons: &mut [Polygon], attribute: &str) {
    for polygon in polygons {
        if let Some(code) = polygon.attribute(attribute).and_then(|v| v.as_i64()) {
            polygon.class_code = Some(code);
        }
    }
}

async fn import(args: ImportArgs, ctx: &CommandContext) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.path)
        .await
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let mut polygons = polygons_from_geojson(&content)?;
    if polygons.is_empty() {
        bail!("{} contains no polygons", args.path.display());
    }

    if let Some(attribute) = &args.class_attribute {
        apply_class_attribute(&mut polygons, attribute);
    }
    let labeled = polygons.iter().filter(|p| p.is_labeled()).count();
    if labeled < polygons.len() {
        ctx.output.warning(format!(
            "{} of {} polygons carry no class code and will be ignored in training",
            polygons.len() - labeled,
            polygons.len()
        ));
    }

    let imported = ctx.storage.store.save_training_polygons(&args.training_set, &polygons).await?;
    tracing::info!(training_set = %args.training_set, imported, labeled, "Imported training polygons");

    let output = &ctx.output;
    let crs = polygons.first().map(|p| p.crs.to_string());
    if output.is_json() {
        output.result(ImportOutput { training_set: args.training_set, imported, labeled, crs })?;
    } else {
        output.success(format!("Imported {} polygons into '{}'", imported, args.training_set));
        output.kv("Labeled", labeled);
        if let Some(crs) = crs {
            output.kv("CRS", crs);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::models::{Crs, Geometry};

    #[test]
    fn test_class_attribute_sets_codes() {
        let square = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]);
        let mut polygons = vec![
            Polygon::new(1, square.clone(), Crs::wgs84()).with_attribute("lc", 40i64),
            Polygon::new(2, square.clone(), Crs::wgs84()).with_attribute("lc", "forest"),
            Polygon::new(3, square, Crs::wgs84()),
        ];
        apply_class_attribute(&mut polygons, "lc");

        assert_eq!(polygons[0].class_code, Some(40));
        assert_eq!(polygons[1].class_code, None);
        assert_eq!(polygons[2].class_code, None);
    }
}
