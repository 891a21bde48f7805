//! In-flight value changes.
//!
//! Every `set_target_value` call returns a [`Changer`]. The change itself
//! runs as background work; the caller decides when to [`wait`](Changer::wait)
//! for it. [`stop`](Changer::stop) forwards to the stopper supplied by the
//! adjustable (typically the device's own stop command).

use crate::task::{TaskHandle, TaskStatus};
use futures::future::BoxFuture;
use std::future::Future;
use tracing::{debug, info};

/// Callback issuing a stop to whatever drives the change.
pub type Stopper = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handle representing one value change in progress.
pub struct Changer {
    target: f64,
    task: TaskHandle<()>,
    stopper: Option<Stopper>,
}

impl Changer {
    /// Start a change towards `target`.
    pub fn spawn<F>(name: impl Into<String>, target: f64, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            target,
            task: TaskHandle::spawn(name, work),
            stopper: None,
        }
    }

    /// Prepare a change without starting it (`hold`).
    pub fn held<F>(name: impl Into<String>, target: f64, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            target,
            task: TaskHandle::held(name, work),
            stopper: None,
        }
    }

    /// Attach a stopper used by [`stop`](Self::stop).
    #[must_use]
    pub fn with_stopper(mut self, stopper: Stopper) -> Self {
        self.stopper = Some(stopper);
        self
    }

    /// Name of the adjustable being changed.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Target value of this change.
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Start a held change.
    pub fn start(&mut self) {
        self.task.start();
    }

    /// `waiting`, `changing` or `done`.
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Block until the change finished; errors of the change are returned.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        self.task.wait().await?;
        debug!(adjustable = %self.name(), target = self.target, "Change complete");
        Ok(())
    }

    /// Ask the device to stop. Without a stopper this does nothing.
    pub async fn stop(&self) -> anyhow::Result<()> {
        match &self.stopper {
            Some(stopper) => {
                info!(adjustable = %self.name(), "Stopping change");
                stopper().await
            }
            None => {
                debug!(adjustable = %self.name(), "No stopper attached, stop ignored");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Changer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Changer")
            .field("name", &self.name())
            .field("target", &self.target)
            .field("status", &self.status())
            .field("has_stopper", &self.stopper.is_some())
            .finish()
    }
}

/// Wait for every changer; all are joined even if one fails.
pub async fn wait_changers(changers: &mut [Changer]) -> anyhow::Result<()> {
    let mut first_err = None;
    for changer in changers.iter_mut() {
        if let Err(e) = changer.wait().await {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{Duration, sleep};

    #[tokio::test]
    async fn test_changer_reports_target_and_status() {
        let mut changer = Changer::spawn("mono.energy", 9.5, async {
            sleep(Duration::from_millis(30)).await;
            Ok(())
        });
        assert_eq!(changer.target(), 9.5);
        assert_eq!(changer.status(), TaskStatus::Changing);
        changer.wait().await.unwrap();
        assert_eq!(changer.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_held_changer_starts_on_wait() {
        let mut changer = Changer::held("slit.width", 1.0, async { Ok(()) });
        assert_eq!(changer.status(), TaskStatus::Waiting);
        changer.wait().await.unwrap();
        assert_eq!(changer.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_stop_calls_stopper() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let changer = Changer::spawn("x", 1.0, async {
            sleep(Duration::from_millis(10)).await;
            Ok(())
        })
        .with_stopper(Box::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));
        changer.stop().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_stopper_is_noop() {
        let changer = Changer::held("x", 1.0, async { Ok(()) });
        assert!(changer.stop().await.is_ok());
        assert_eq!(changer.status(), TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn test_wait_changers_joins_all() {
        let mut changers = vec![
            Changer::spawn("a", 0.0, async { anyhow::bail!("a blocked") }),
            Changer::spawn("b", 0.0, async {
                sleep(Duration::from_millis(20)).await;
                Ok(())
            }),
        ];
        let err = wait_changers(&mut changers).await.unwrap_err();
        assert_eq!(err.to_string(), "a blocked");
        assert_eq!(changers[1].status(), TaskStatus::Done);
    }
}
