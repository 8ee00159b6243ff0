//! Categorical one-hot encoding.
//!
//! Category dictionaries are captured once, in first-seen order, and replayed
//! at prediction time. A category that was never seen encodes as all zeros.

use landcube_core::models::{CategoricalSchema, CategorySource};

/// Build a category dictionary from observed values, in first-seen order
pub fn learn_categories<'a>(
    column: &str,
    source: CategorySource,
    values: impl IntoIterator<Item = Option<&'a str>>,
) -> CategoricalSchema {
    let mut categories: Vec<String> = Vec::new();
    for value in values.into_iter().flatten() {
        if !categories.iter().any(|c| c == value) {
            categories.push(value.to_string());
        }
    }
    CategoricalSchema { column: column.to_string(), source, categories }
}

/// One-hot row for a single value; missing or unseen values give all zeros
pub fn one_hot(schema: &CategoricalSchema, value: Option<&str>) -> Vec<f64> {
    let mut row = vec![0.0; schema.categories.len()];
    if let Some(code) = value.and_then(|v| schema.code_of(v)) {
        row[code] = 1.0;
    }
    row
}

/// Inverse of [`one_hot`]: the category whose column is set, if any
pub fn decode_one_hot<'a>(schema: &'a CategoricalSchema, row: &[f64]) -> Option<&'a str> {
    row.iter()
        .zip(&schema.categories)
        .find(|(v, _)| **v > 0.5)
        .map(|(_, category)| category.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CategoricalSchema {
        learn_categories(
            "landcover_type",
            CategorySource::Attribute,
            [Some("water"), None, Some("forest"), Some("water")],
        )
    }

    #[test]
    fn test_first_seen_order() {
        assert_eq!(schema().categories, vec!["water", "forest"]);
    }

    #[test]
    fn test_unseen_category_is_all_zero() {
        let schema = schema();
        assert_eq!(one_hot(&schema, Some("forest")), vec![0.0, 1.0]);
        assert_eq!(one_hot(&schema, Some("urban")), vec![0.0, 0.0]);
        assert_eq!(one_hot(&schema, None), vec![0.0, 0.0]);
    }

    #[test]
    fn test_decode() {
        let schema = schema();
        assert_eq!(decode_one_hot(&schema, &one_hot(&schema, Some("water"))), Some("water"));
        assert_eq!(decode_one_hot(&schema, &[0.0, 0.0]), None);
    }
}
