//! Background task handles.
//!
//! A [`TaskHandle`] turns a blocking device call (a move, an acquisition)
//! into a handle that can be started, polled and joined. It is the common
//! core of [`crate::changer::Changer`] and of acquisition handles in the
//! scan crate.
//!
//! # Lifecycle
//!
//! ```text
//! ┌─────────┐  start()  ┌──────────┐  work returns  ┌──────┐
//! │ Waiting │──────────▶│ Changing │───────────────▶│ Done │
//! └─────────┘           └──────────┘                └──────┘
//! ```
//!
//! `wait()` on a held task starts it first.

use crate::error::EcoError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Externally visible state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created but not started
    Waiting,
    /// Work in progress
    Changing,
    /// Work finished (successfully or not)
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Waiting => write!(f, "waiting"),
            TaskStatus::Changing => write!(f, "changing"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

enum TaskState<T> {
    Held(BoxFuture<'static, anyhow::Result<T>>),
    Running(JoinHandle<anyhow::Result<T>>),
    Joined,
}

/// Handle on a unit of background work producing `T`.
pub struct TaskHandle<T> {
    name: String,
    state: TaskState<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Create a held task. Nothing runs until [`start`](Self::start) or
    /// [`wait`](Self::wait).
    pub fn held<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            state: TaskState::Held(Box::pin(work)),
        }
    }

    /// Create and immediately start a task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut handle = Self::held(name, work);
        handle.start();
        handle
    }

    /// Label used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a held task. No effect if it is already running or joined.
    pub fn start(&mut self) {
        let state = std::mem::replace(&mut self.state, TaskState::Joined);
        self.state = match state {
            TaskState::Held(work) => {
                debug!(task = %self.name, "Starting background task");
                TaskState::Running(tokio::spawn(work))
            }
            other => other,
        };
    }

    /// Poll the current status without blocking.
    pub fn status(&self) -> TaskStatus {
        match &self.state {
            TaskState::Held(_) => TaskStatus::Waiting,
            TaskState::Running(handle) if !handle.is_finished() => TaskStatus::Changing,
            _ => TaskStatus::Done,
        }
    }

    /// Join the task and return the work's result.
    ///
    /// Errors raised by the work are returned unchanged. A panic surfaces as
    /// [`EcoError::TaskPanicked`]; joining twice yields
    /// [`EcoError::AlreadyJoined`].
    pub async fn wait(&mut self) -> anyhow::Result<T> {
        self.start();
        let state = std::mem::replace(&mut self.state, TaskState::Joined);
        let handle = match state {
            TaskState::Running(handle) => handle,
            TaskState::Held(_) | TaskState::Joined => {
                return Err(EcoError::AlreadyJoined {
                    name: self.name.clone(),
                }
                .into())
            }
        };
        trace!(task = %self.name, "Joining background task");
        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(EcoError::TaskPanicked {
                name: self.name.clone(),
                reason: join_err.to_string(),
            }
            .into()),
        }
    }

    /// Abort the underlying tokio task. The device is not told to stop.
    pub fn abort(&self) {
        if let TaskState::Running(handle) = &self.state {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            TaskState::Held(_) => "held",
            TaskState::Running(_) => "running",
            TaskState::Joined => "joined",
        };
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}

/// Join every handle, returning the first error after all have finished.
pub async fn wait_all<T: Send + 'static>(handles: &mut [TaskHandle<T>]) -> anyhow::Result<Vec<T>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for handle in handles.iter_mut() {
        match handle.wait().await {
            Ok(value) => results.push(value),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::{Duration, sleep};

    #[tokio::test]
    async fn test_held_task_does_not_run_until_started() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut task = TaskHandle::held("flag", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        sleep(Duration::from_millis(20)).await;
        assert_eq!(task.status(), TaskStatus::Waiting);
        assert!(!ran.load(Ordering::SeqCst));

        task.wait().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(task.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let mut task = TaskHandle::spawn("slow", async {
            sleep(Duration::from_millis(50)).await;
            Ok(7)
        });
        assert_eq!(task.status(), TaskStatus::Changing);
        assert_eq!(task.wait().await.unwrap(), 7);
        assert_eq!(task.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_wait_returns_after_work_finished() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let mut task = TaskHandle::spawn("slow", async move {
            sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        task.wait().await.unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let mut task: TaskHandle<()> =
            TaskHandle::spawn("failing", async { anyhow::bail!("motor stalled") });
        let err = task.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "motor stalled");
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let trip = true;
        let mut task: TaskHandle<()> = TaskHandle::spawn("panicky", async move {
            if trip {
                panic!("boom");
            }
            Ok(())
        });
        let err = task.wait().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::TaskPanicked { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_wait_is_rejected() {
        let mut task = TaskHandle::spawn("once", async { Ok(()) });
        task.wait().await.unwrap();
        let err = task.wait().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::AlreadyJoined { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_all_collects_first_error() {
        let mut handles = vec![
            TaskHandle::spawn("a", async { Ok(1) }),
            TaskHandle::spawn("b", async { anyhow::bail!("b failed") }),
            TaskHandle::spawn("c", async { Ok(3) }),
        ];
        let err = wait_all(&mut handles).await.unwrap_err();
        assert_eq!(err.to_string(), "b failed");
        assert!(handles.iter().all(|h| h.status() == TaskStatus::Done));
    }
}
