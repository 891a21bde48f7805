//! Counters and acquisition handles.
//!
//! A [`Counter`] is anything that records data when asked: a detector DAQ,
//! a camera server, a digitizer. `acquire` blocks until the data landed on
//! disk and returns the files written. [`CounterExt::start_acquisition`]
//! wraps that call into an [`Acquisition`] handle so several counters can
//! record the same step concurrently.

use async_trait::async_trait;
use eco_core::{TaskHandle, TaskStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Parameters of one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    /// Base file name (without extension); counters pick their own suffix
    pub file_name: Option<PathBuf>,
    /// Number of pulses (shots) to record
    pub n_pulses: u32,
}

impl AcquisitionRequest {
    /// Request `n_pulses` written under `file_name`.
    pub fn new(file_name: impl Into<PathBuf>, n_pulses: u32) -> Self {
        Self {
            file_name: Some(file_name.into()),
            n_pulses,
        }
    }
}

/// Capability: record data.
#[async_trait]
pub trait Counter: Send + Sync {
    /// Alias of the counter.
    fn name(&self) -> &str;

    /// Record and return the files written.
    async fn acquire(&self, request: AcquisitionRequest) -> anyhow::Result<Vec<PathBuf>>;
}

/// Handle on a running acquisition.
#[derive(Debug)]
pub struct Acquisition {
    request: AcquisitionRequest,
    task: TaskHandle<Vec<PathBuf>>,
}

impl Acquisition {
    /// Counter name.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Parameters this acquisition was started with.
    pub fn request(&self) -> &AcquisitionRequest {
        &self.request
    }

    /// `waiting`, `changing` or `done`.
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Block until the data is written; returns the files.
    pub async fn wait(&mut self) -> anyhow::Result<Vec<PathBuf>> {
        self.task.wait().await
    }
}

/// Starting acquisitions on shared counters.
pub trait CounterExt {
    /// Start an acquisition in the background.
    fn start_acquisition(&self, request: AcquisitionRequest) -> Acquisition;
}

impl CounterExt for Arc<dyn Counter> {
    fn start_acquisition(&self, request: AcquisitionRequest) -> Acquisition {
        debug!(counter = %self.name(), ?request, "Starting acquisition");
        let counter = Arc::clone(self);
        let req = request.clone();
        Acquisition {
            request,
            task: TaskHandle::spawn(self.name(), async move { counter.acquire(req).await }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, sleep};

    struct Recorder;

    #[async_trait]
    impl Counter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn acquire(&self, request: AcquisitionRequest) -> anyhow::Result<Vec<PathBuf>> {
            sleep(Duration::from_millis(20)).await;
            let base = request
                .file_name
                .ok_or_else(|| anyhow::anyhow!("no file name"))?;
            Ok(vec![base.with_extension("h5")])
        }
    }

    #[tokio::test]
    async fn test_acquisition_returns_files() {
        let counter: Arc<dyn Counter> = Arc::new(Recorder);
        let mut acq = counter.start_acquisition(AcquisitionRequest::new("/data/run0001", 100));
        assert_eq!(acq.status(), TaskStatus::Changing);
        let files = acq.wait().await.unwrap();
        assert_eq!(files, vec![PathBuf::from("/data/run0001.h5")]);
        assert_eq!(acq.status(), TaskStatus::Done);
        assert_eq!(acq.request().n_pulses, 100);
    }

    #[tokio::test]
    async fn test_acquisition_error_propagates() {
        let counter: Arc<dyn Counter> = Arc::new(Recorder);
        let mut acq = counter.start_acquisition(AcquisitionRequest {
            file_name: None,
            n_pulses: 1,
        });
        assert_eq!(acq.wait().await.unwrap_err().to_string(), "no file name");
    }
}
