//! Cancellable background tasks with an error channel.
//!
//! Work handed off after a synchronous response (the interactive full
//! render) runs here instead of as a detached task. Failures are sent on
//! the receiver returned by [`BackgroundTasks::new`], and [`cancel_all`]
//! stops every task at its next suspension point.
//!
//! [`cancel_all`]: BackgroundTasks::cancel_all

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A background task that returned an error.
#[derive(Debug)]
pub struct TaskFailure {
    pub name: String,
    pub error: anyhow::Error,
}

struct Inner {
    cancel: watch::Sender<bool>,
    failures: mpsc::UnboundedSender<TaskFailure>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl BackgroundTasks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskFailure>) {
        let (cancel, _) = watch::channel(false);
        let (failures, rx) = mpsc::unbounded_channel();
        let tasks = Self {
            inner: Arc::new(Inner {
                cancel,
                failures,
                handles: Mutex::new(Vec::new()),
            }),
        };
        (tasks, rx)
    }

    /// Run `fut` until it finishes or [`cancel_all`](Self::cancel_all) is called.
    pub fn spawn<F>(&self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let mut cancel = self.inner.cancel.subscribe();
        let failures = self.inner.failures.clone();

        let handle = tokio::spawn(async move {
            if *cancel.borrow() {
                debug!(task = %name, "skipped, already cancelled");
                return;
            }
            let cancelled = async {
                if cancel.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                result = fut => {
                    if let Err(error) = result {
                        if let Err(unsent) = failures.send(TaskFailure { name, error }) {
                            let failure = unsent.0;
                            warn!(task = %failure.name, error = %format!("{:#}", failure.error), "background task failed");
                        }
                    }
                }
                _ = cancelled => {
                    debug!(task = %name, "background task cancelled");
                }
            }
        });

        let mut handles = self.inner.handles.lock().unwrap();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn cancel_all(&self) {
        self.inner.cancel.send_replace(true);
    }

    /// Wait for every task spawned so far.
    pub async fn join_all(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.inner.handles.lock().unwrap());
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "background task panicked");
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.inner
            .handles
            .lock()
            .unwrap()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failure_is_reported() {
        let (tasks, mut failures) = BackgroundTasks::new();
        tasks.spawn("boom", async { anyhow::bail!("render failed") });
        tasks.join_all().await;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.name, "boom");
        assert!(failure.error.to_string().contains("render failed"));
    }

    #[tokio::test]
    async fn test_success_reports_nothing() {
        let (tasks, mut failures) = BackgroundTasks::new();
        tasks.spawn("ok", async { Ok(()) });
        tasks.join_all().await;
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_long_task() {
        let (tasks, mut failures) = BackgroundTasks::new();
        tasks.spawn("sleepy", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            anyhow::bail!("should not finish")
        });
        tokio::task::yield_now().await;
        tasks.cancel_all();
        tasks.join_all().await;
        assert!(failures.try_recv().is_err());
        assert_eq!(tasks.pending(), 0);
    }
}
