//! Per-connection task ownership with structured teardown

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owns the background tasks of one connection
///
/// Every task gets a child of the supervisor's token. `shutdown` cancels the
/// token and joins each task within a shared deadline; stragglers are
/// aborted and abandoned.
pub struct TaskSupervisor {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a named task; the closure receives the cancellation token
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.token.child_token()));
        debug!("Spawned connection task '{}'", name);
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel everything and wait up to `timeout` in total
    ///
    /// Returns the number of tasks that had to be abandoned.
    pub async fn shutdown(self, timeout: Duration) -> usize {
        self.token.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut abandoned = 0;

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!("Task '{}' stopped", name),
                Ok(Err(e)) if e.is_panic() => warn!("Task '{}' panicked: {}", name, e),
                Ok(Err(_)) => debug!("Task '{}' was cancelled", name),
                Err(_) => {
                    warn!("Task '{}' did not stop within {:?}, abandoning", name, timeout);
                    handle.abort();
                    abandoned += 1;
                }
            }
        }

        abandoned
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
