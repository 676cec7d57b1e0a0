//! Background task plumbing shared by all request kinds.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A unit of network work that can be run in place or on its own task.
pub trait NetworkTask: Send + Sized + 'static {
    type Output: Send + 'static;

    /// Run to completion. `cancel` is observed at every socket wait.
    fn run(self, cancel: CancellationToken) -> impl Future<Output = Self::Output> + Send;

    /// Spawn onto the runtime; the single result arrives on the handle.
    fn spawn(self) -> TaskHandle<Self::Output> {
        let cancel = CancellationToken::new();
        let (tx, completion) = oneshot::channel();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let output = self.run(token).await;
            let _ = tx.send(output);
        });
        TaskHandle {
            cancel,
            completion,
            join,
        }
    }
}

/// Handle to a spawned [`NetworkTask`].
pub struct TaskHandle<T> {
    cancel: CancellationToken,
    completion: oneshot::Receiver<T>,
    join: JoinHandle<()>,
}

impl<T> TaskHandle<T> {
    /// Ask the task to stop at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the result. `None` if the task died before producing one.
    pub async fn wait(self) -> Option<T> {
        let output = self.completion.await.ok();
        let _ = self.join.await;
        output
    }
}
