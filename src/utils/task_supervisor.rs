use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use crate::error::{Error, Result};
use tracing::{error, info, warn};

/// Task Supervisor - Runs feed tasks and reports how each one ended
///
/// ## Purpose
/// Every feed runs as its own task returning `Result<()>`. The supervisor
/// surfaces the first task to finish, whether it stopped cleanly, failed
/// with an error or panicked, so the process can decide to exit.
///
/// ## Usage
/// ```ignore
/// let mut supervisor = TaskSupervisor::new();
/// supervisor.spawn("bybit-spot", engine.run());
///
/// if let Some((name, Err(e))) = supervisor.next_exit().await {
///     error!("Feed {} failed: {}", name, e);
/// }
/// ```
pub struct TaskSupervisor {
    tasks: JoinSet<(String, Result<()>)>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: JoinSet::new(),
        }
    }

    /// Spawn a new task and register it for monitoring
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        info!("Spawned task: {}", name);

        self.tasks.spawn(async move {
            let result = AssertUnwindSafe(future).catch_unwind().await.unwrap_or_else(|_| {
                Err(Error::TaskFailed {
                    task: name.clone(),
                    reason: "panicked".to_string(),
                })
            });
            (name, result)
        });
        self
    }

    /// Waits for the next task to finish. `None` once nothing is running.
    pub async fn next_exit(&mut self) -> Option<(String, Result<()>)> {
        match self.tasks.join_next().await? {
            Ok((name, result)) => {
                match &result {
                    Ok(()) => info!("Task {} completed", name),
                    Err(e) => error!("Task {} failed: {}", name, e),
                }
                Some((name, result))
            }
            // only reachable after abort_all
            Err(e) => {
                warn!("Task cancelled: {}", e);
                Some((
                    String::new(),
                    Err(Error::TaskFailed {
                        task: String::new(),
                        reason: e.to_string(),
                    }),
                ))
            }
        }
    }

    /// Waits until a task ends with a fatal error. Clean exits and
    /// recoverable errors are logged and skipped. `None` once nothing is
    /// running.
    pub async fn next_failure(&mut self) -> Option<(String, Error)> {
        loop {
            match self.next_exit().await? {
                (_, Ok(())) => {}
                (name, Err(e)) if e.is_fatal() => return Some((name, e)),
                (name, Err(e)) => {
                    warn!(kind = e.kind().as_str(), "Task {} stopped with a recoverable error: {}", name, e);
                }
            }
        }
    }

    /// Get count of active tasks
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits up to `grace` for remaining tasks, then aborts the stragglers.
    pub async fn shutdown_all(&mut self, grace: Duration) {
        info!("Waiting for {} tasks to stop", self.tasks.len());

        let drained = tokio::time::timeout(grace, async {
            while self.next_exit().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} tasks after {:?}", self.tasks.len(), grace);
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
