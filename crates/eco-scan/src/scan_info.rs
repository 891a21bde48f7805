//! Persisted scan log.
//!
//! A scan keeps four parallel lists, one entry per completed step:
//!
//! | list              | entry                                   |
//! |-------------------|-----------------------------------------|
//! | `scan_values`     | target value of every adjustable        |
//! | `scan_readbacks`  | value read back after the move          |
//! | `scan_files`      | files written by the counters           |
//! | `scan_step_info`  | timestamp, repeats, monitor readings    |
//!
//! The lists are only ever extended together through
//! [`ScanInfo::push_step`], and the file is rewritten after every step, so
//! a crashed scan leaves a consistent log of the steps it completed.

use chrono::{DateTime, Utc};
use eco_core::{EcoError, EcoResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Names (and channels) of the scanned adjustables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    /// Adjustable aliases
    pub name: Vec<String>,
    /// Channel of each adjustable, if known
    #[serde(rename = "Id")]
    pub id: Vec<Option<String>>,
}

/// Bookkeeping for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Zero-based step index
    pub step: usize,
    /// When the step finished
    pub timestamp: DateTime<Utc>,
    /// Acquisitions needed until the checker was satisfied
    pub acquisition_repeats: u32,
    /// Monitor detector readings taken after acquisition
    #[serde(default)]
    pub monitors: BTreeMap<String, f64>,
}

/// The scan log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    scan_parameters: ScanParameters,
    scan_values: Vec<Vec<f64>>,
    scan_readbacks: Vec<Vec<f64>>,
    scan_files: Vec<Vec<PathBuf>>,
    scan_step_info: Vec<StepInfo>,
}

impl ScanInfo {
    /// Empty log for the given adjustables.
    pub fn new(scan_parameters: ScanParameters) -> Self {
        Self {
            scan_parameters,
            ..Default::default()
        }
    }

    /// Append one step to all four lists.
    pub fn push_step(
        &mut self,
        values: Vec<f64>,
        readbacks: Vec<f64>,
        files: Vec<PathBuf>,
        info: StepInfo,
    ) {
        self.scan_values.push(values);
        self.scan_readbacks.push(readbacks);
        self.scan_files.push(files);
        self.scan_step_info.push(info);
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.scan_values.len()
    }

    /// True before the first step.
    pub fn is_empty(&self) -> bool {
        self.scan_values.is_empty()
    }

    /// Scanned adjustables.
    pub fn scan_parameters(&self) -> &ScanParameters {
        &self.scan_parameters
    }

    /// Target values per step.
    pub fn scan_values(&self) -> &[Vec<f64>] {
        &self.scan_values
    }

    /// Readbacks per step.
    pub fn scan_readbacks(&self) -> &[Vec<f64>] {
        &self.scan_readbacks
    }

    /// Files per step.
    pub fn scan_files(&self) -> &[Vec<PathBuf>] {
        &self.scan_files
    }

    /// Step bookkeeping.
    pub fn scan_step_info(&self) -> &[StepInfo] {
        &self.scan_step_info
    }

    fn check_consistent(&self) -> EcoResult<()> {
        let lens = [
            self.scan_values.len(),
            self.scan_readbacks.len(),
            self.scan_files.len(),
            self.scan_step_info.len(),
        ];
        if lens.iter().any(|&l| l != lens[0]) {
            return Err(EcoError::Configuration(format!(
                "scan info lists differ in length: {lens:?}"
            )));
        }
        Ok(())
    }

    /// Write as pretty JSON, replacing the previous file atomically.
    pub async fn write_to(&self, path: &Path) -> EcoResult<()> {
        let body = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        trace!(path = %path.display(), steps = self.len(), "Wrote scan info");
        Ok(())
    }

    /// Load a log, rejecting lists of unequal length.
    pub async fn read_from(path: &Path) -> EcoResult<Self> {
        let raw = tokio::fs::read(path).await?;
        let info: ScanInfo = serde_json::from_slice(&raw)?;
        info.check_consistent()?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(i: usize) -> StepInfo {
        StepInfo {
            step: i,
            timestamp: Utc::now(),
            acquisition_repeats: 1,
            monitors: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_info.json");
        let mut info = ScanInfo::new(ScanParameters {
            name: vec!["gamma".into()],
            id: vec![Some("XRD:GAMMA".into())],
        });
        for i in 0..3 {
            info.push_step(
                vec![i as f64],
                vec![i as f64 + 0.001],
                vec![PathBuf::from(format!("run_step{i:04}.json"))],
                step(i),
            );
            info.write_to(&path).await.unwrap();
        }

        let loaded = ScanInfo::read_from(&path).await.unwrap();
        assert_eq!(loaded, info);
        assert_eq!(loaded.len(), 3);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_layout() {
        let mut info = ScanInfo::new(ScanParameters {
            name: vec!["x".into()],
            id: vec![None],
        });
        info.push_step(vec![1.0], vec![1.0], vec![], step(0));
        let json = serde_json::to_value(&info).unwrap();
        for key in ["scan_values", "scan_readbacks", "scan_files", "scan_step_info"] {
            assert_eq!(json[key].as_array().map(Vec::len), Some(1), "{key}");
        }
        assert_eq!(json["scan_parameters"]["name"][0], "x");
        assert!(json["scan_parameters"]["Id"][0].is_null());
    }

    #[tokio::test]
    async fn test_read_rejects_inconsistent_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        let mut json = serde_json::to_value(ScanInfo::default()).unwrap();
        json["scan_values"] = serde_json::json!([[1.0], [2.0]]);
        tokio::fs::write(&path, serde_json::to_vec(&json).unwrap())
            .await
            .unwrap();

        let err = ScanInfo::read_from(&path).await.unwrap_err();
        assert!(matches!(err, EcoError::Configuration(_)));
    }
}
