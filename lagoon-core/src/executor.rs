//! Notification executors.
//!
//! Listener callbacks never run on the caller's stack frame while role
//! state is borrowed; they are handed to an [`Executor`] as boxed tasks.
//! [`InlineExecutor`] runs them immediately (handy in tests), while
//! [`SerialExecutor`] drains them in submission order on a tokio task.

use tokio::sync::mpsc;
use tracing::{trace, warn};

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs listener notifications.
///
/// Implementations must run tasks submitted from one thread in submission
/// order.
pub trait Executor: Send + Sync {
    /// Submit a task for execution.
    fn execute(&self, task: Task);
}

/// Executor running every task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Executor draining tasks one at a time, in order, on a tokio task.
///
/// Dropping every handle to the executor closes the queue; the background
/// task exits once the already-queued tasks have run.
#[derive(Debug, Clone)]
pub struct SerialExecutor {
    sender: mpsc::UnboundedSender<Task>,
}

impl SerialExecutor {
    /// Start the draining task on the given runtime.
    pub fn spawn(handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = receiver.recv().await {
                task();
            }
            trace!("serial executor queue closed");
        });
        Self { sender }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!("serial executor stopped, dropping notification");
        }
    }
}
