use std::future::Future;
use tokio::task::JoinHandle;

/// Tracks background tasks so they can be aborted together
pub struct TaskManager {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Spawn a task and track it under `label`
    pub fn spawn<F>(&mut self, label: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.track(label, tokio::spawn(future));
    }

    /// Track a task spawned elsewhere
    pub fn track(&mut self, label: &'static str, handle: JoinHandle<()>) {
        self.handles.retain(|(_, handle)| !handle.is_finished());
        tracing::debug!("Tracking task '{}'", label);
        self.handles.push((label, handle));
    }

    /// Number of tracked tasks still running
    pub fn running(&self) -> usize {
        self.handles
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Abort all tracked tasks and wait for them to finish
    pub async fn shutdown(self) {
        for (label, handle) in self.handles {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("Task '{}' failed: {}", label, e);
                }
            }
        }
    }

    /// Abort all tasks without waiting
    pub fn abort_all(&mut self) {
        for (label, handle) in self.handles.drain(..) {
            if !handle.is_finished() {
                tracing::debug!("Aborting task '{}'", label);
            }
            handle.abort();
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
