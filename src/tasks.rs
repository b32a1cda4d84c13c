use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Background loops sharing one shutdown token.
pub struct TaskSet {
    shutdown: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn a loop. The closure receives its own clone of the shutdown token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown.clone()));
        info!(task = name, "Task started");
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Cancel every loop and wait for all of them. Returns how many panicked.
    pub async fn shutdown(self) -> usize {
        self.shutdown.cancel();

        let mut panicked = 0;
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Task panicked");
                panicked += 1;
            }
        }
        panicked
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}
