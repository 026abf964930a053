use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{error, info};
use crate::error::{Error, Result};

/// Keeps the service's long-running tasks alive and visible.
///
/// ## Purpose
/// Every scheduler and the fusion loop run forever, so a task that finishes
/// at all has failed. `check_health` reaps such tasks and reports how each one
/// ended.
///
/// ## Usage
/// ```ignore
/// let mut supervisor = TaskSupervisor::new();
/// supervisor.spawn("price_fusion", async move {
///     // task logic
/// });
///
/// if let Err(e) = supervisor.check_health().await {
///     error!("Task failure detected: {}", e);
/// }
/// ```
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    /// Spawn a background task and register it under `name`.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        info!("Spawned background task: {}", name);
        if let Some(previous) = self.tasks.insert(name.clone(), handle) {
            previous.abort();
            info!("Replaced background task: {}", name);
        }
        self
    }

    /// Reap tasks that have stopped. Errors name every stopped task.
    pub async fn check_health(&mut self) -> Result<()> {
        let finished: Vec<String> = self.tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if finished.is_empty() {
            return Ok(());
        }

        let mut reports = Vec::with_capacity(finished.len());
        for name in finished {
            let Some(handle) = self.tasks.remove(&name) else { continue };
            let report = match handle.await {
                Ok(()) => format!("{} exited", name),
                Err(e) if e.is_panic() => format!("{} panicked", name),
                Err(e) => format!("{} stopped: {}", name, e),
            };
            error!("Background task stopped: {}", report);
            reports.push(report);
        }

        Err(Error::TaskFailed(reports.join(", ")))
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Abort every registered task.
    pub async fn shutdown_all(&mut self) {
        info!("Shutting down {} background tasks", self.tasks.len());

        for (name, handle) in self.tasks.drain() {
            handle.abort();
            info!("Aborted task: {}", name);
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
