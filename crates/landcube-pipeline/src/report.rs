//! Run-level summary of per-tile outcomes.

use crate::stage::{TileFailure, TileStage};
use landcube_core::error::ErrorKind;
use landcube_core::models::TileKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A tile stopped by cancellation, and how far it got
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledTile {
    pub tile_key: TileKey,
    pub stage: TileStage,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Tiles dispatched to workers
    pub total_tiles: usize,

    pub succeeded: Vec<TileKey>,

    pub failed: Vec<TileFailure>,

    pub cancelled: Vec<CancelledTile>,

    /// Cross-cutting error that stopped the run early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,

    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&mut self, key: TileKey) {
        self.total_tiles += 1;
        self.succeeded.push(key);
    }

    pub fn add_failure(&mut self, failure: TileFailure) {
        self.total_tiles += 1;
        self.failed.push(failure);
    }

    pub fn add_cancelled(&mut self, key: TileKey, stage: TileStage) {
        self.total_tiles += 1;
        self.cancelled.push(CancelledTile { tile_key: key, stage });
    }

    /// Sort entries by tile key and stamp the elapsed time
    pub fn finish(&mut self, elapsed: Duration) {
        self.succeeded.sort();
        self.failed.sort_by(|a, b| a.tile_key.cmp(&b.tile_key));
        self.cancelled.sort_by(|a, b| a.tile_key.cmp(&b.tile_key));
        self.elapsed_secs = elapsed.as_secs_f64();
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    /// Every tile finished and the run was not aborted
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && self.aborted.is_none()
    }

    /// Keys of tiles that did not finish, failures first
    pub fn failed_keys(&self) -> Vec<&TileKey> {
        self.failed
            .iter()
            .map(|f| &f.tile_key)
            .chain(self.cancelled.iter().map(|c| &c.tile_key))
            .collect()
    }

    /// Failure counts by error kind
    pub fn failures_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failed {
            *counts.entry(failure.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn has_failure_kind(&self, kind: ErrorKind) -> bool {
        self.failed.iter().any(|f| f.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::error::LandcubeError;

    fn gap(key: &TileKey) -> TileFailure {
        let err = LandcubeError::DataGap {
            product: "s2".to_string(),
            tile: key.to_string(),
            reason: "no scenes".to_string(),
        };
        TileFailure::new(key.clone(), TileStage::Fetching, &err)
    }

    #[test]
    fn test_counts_and_order() {
        let mut report = RunReport::new();
        report.add_success(TileKey::new(1, 0));
        report.add_failure(gap(&TileKey::new(1, 1)));
        report.add_success(TileKey::new(0, 0));
        report.add_success(TileKey::new(0, 1));
        report.finish(Duration::from_millis(1500));

        assert_eq!(report.total_tiles, 4);
        assert_eq!(report.success_count(), 3);
        assert_eq!(report.failure_count(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(report.succeeded[0], TileKey::new(0, 0));
        assert_eq!(report.failed_keys(), vec![&TileKey::new(1, 1)]);
        assert_eq!(report.failures_by_kind().get("DataGapError"), Some(&1));
        assert!(report.has_failure_kind(ErrorKind::DataGap));
        assert_eq!(report.elapsed_secs, 1.5);
    }

    #[test]
    fn test_cancelled_tiles_are_not_success() {
        let mut report = RunReport::new();
        report.add_success(TileKey::new(0, 0));
        report.add_cancelled(TileKey::new(1, 0), TileStage::Pending);
        report.finish(Duration::ZERO);

        assert!(!report.all_succeeded());
        assert_eq!(report.failed_keys(), vec![&TileKey::new(1, 0)]);
    }

    #[test]
    fn test_json_shape() {
        let mut report = RunReport::new();
        report.add_failure(gap(&TileKey::new(2, 3)));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"][0]["stage"], "fetching");
        assert_eq!(json["failed"][0]["kind"], "DataGap");
        assert!(json.get("aborted").is_none());
    }
}
