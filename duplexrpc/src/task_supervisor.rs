use std::future::Future;

use tokio_util::{
    sync::{CancellationToken, DropGuard, WaitForCancellationFuture},
    task::TaskTracker,
};

/// Task lifecycle supervisor for graceful shutdown.
///
/// Every supervised task receives a child of the supervisor's stop token and
/// is expected to wind down on its own once the token fires, so connections
/// get the chance to say goodbye to their peers. [`join`](Self::join)
/// resolves after [`stop`](Self::stop) once every task has returned.
///
/// ```rust,no_run
/// # use duplexrpc::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::default();
/// supervisor.spawn(|stop| async move {
///     stop.cancelled().await;
/// });
/// supervisor.stop();
/// supervisor.join().await;
/// # }
/// ```
#[derive(Debug, Default, Clone)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    stop: CancellationToken,
}

impl TaskSupervisor {
    /// Spawns a tracked task. `task` is handed the token that signals stop.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task(self.stop.child_token()));
    }

    /// Requests all tasks to stop; no new tasks are expected afterwards.
    pub fn stop(&self) {
        self.stop.cancel();
        self.tracker.close();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves when stop is requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    /// Token fired on stop, for work not spawned through the supervisor.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.stop.child_token()
    }

    /// Calls `stop()` when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.stop.clone().drop_guard()
    }

    /// Waits until stop was requested and every task has finished.
    pub async fn join(&self) {
        self.stop.cancelled().await;
        self.tracker.close();
        self.tracker.wait().await;
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.tracker.len()
    }
}
