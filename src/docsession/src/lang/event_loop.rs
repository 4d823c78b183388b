//! The concurrency driver for statements that await.

use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Runtime};
use tokio::task::LocalSet;
use tracing::debug;

use super::interp::{Interpreter, TaskList};

/// A single threaded event loop.
///
/// Tasks created while a future runs on the loop stay scheduled on it and
/// keep running whenever the loop is driven again. Dropping the loop cancels
/// the tasks that are still pending, waits for the cancellation to settle
/// and then releases the scheduler.
pub struct EventLoop {
    interp: Interpreter,
    tasks: TaskList,
    // Field order matters: the local set is dropped before the runtime.
    local: LocalSet,
    runtime: Runtime,
}

impl EventLoop {
    pub fn new(interp: Interpreter) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self {
            interp,
            tasks: TaskList::default(),
            local: LocalSet::new(),
            runtime,
        })
    }

    /// Drive `future` to completion, running scheduled tasks alongside it.
    pub fn run_until_complete<F: Future>(&self, future: F) -> F::Output {
        let previous = self.interp.tasks().enter(self.tasks.clone());
        let output = self.local.block_on(&self.runtime, future);
        self.interp.tasks().leave(previous);
        output
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().iter().filter(|t| !t.is_done()).count()
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let handles = self
            .tasks
            .borrow()
            .iter()
            .filter_map(|task| task.handle.borrow_mut().take())
            .filter(|handle| !handle.is_finished())
            .collect::<Vec<_>>();
        debug!(pending = handles.len(), "closing event loop");
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        self.run_until_complete(async {
            for handle in handles {
                // Cancellation errors are expected here.
                let _ = handle.await;
            }
        });
    }
}
