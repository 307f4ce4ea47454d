//! Cancellable background tasks
//!
//! A [`CancellableTask`] runs one unit of work on a [`WorkerPool`] thread and
//! hands the result back to whoever polls it, which is always the UI thread.
//! The UI thread owns every piece of state the result mutates, so results are
//! only applied from [`CancellableTask::poll`].
//!
//! Lifecycle:
//! - the caller's code before `spawn` is the pre-execute step, it runs
//!   synchronously on the UI thread
//! - the unit runs on a worker and returns `Some(result)` or `None`
//! - `poll` yields [`TaskOutcome::Completed`] only for `Some` results of a
//!   task that was not cancelled; the caller applies it (post-execute)
//! - cleanup (token destroy plus the optional cleanup closure) runs exactly
//!   once on the UI thread: on the first terminal poll, or on drop

mod pool;
mod token;

pub use pool::WorkerPool;
pub use token::CancelToken;

use flume::{Receiver, TryRecvError};
use log::debug;

/// What a poll observed
#[derive(Debug, PartialEq, Eq)]
pub enum TaskOutcome<R> {
    /// The unit is still queued or running
    Pending,
    /// The unit produced a value
    Completed(R),
    /// The unit produced nothing: it returned `None`, was skipped, or panicked
    Empty,
    /// The owner cancelled the task
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskState {
    Running,
    Cancelled,
    Finished,
}

/// Handle to one background unit of work
pub struct CancellableTask<R> {
    token: CancelToken,
    result: Receiver<Option<R>>,
    state: TaskState,
    cleanup: Option<Box<dyn FnOnce()>>,
    cleaned_up: bool,
}

impl<R: Send + 'static> CancellableTask<R> {
    /// Schedule `unit` on the pool
    pub fn spawn<F>(pool: &WorkerPool, unit: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Option<R> + Send + 'static,
    {
        let token = CancelToken::new();
        let (tx, rx) = flume::bounded(1);
        let worker_token = token.clone();

        pool.submit(token.clone(), move || {
            let result = unit(&worker_token);
            let _ = tx.send(result);
        });

        Self {
            token,
            result: rx,
            state: TaskState::Running,
            cleanup: None,
            cleaned_up: false,
        }
    }

    /// Schedule `unit` and run `cleanup` on the polling thread once the task ends
    pub fn spawn_with_cleanup<F, C>(pool: &WorkerPool, unit: F, cleanup: C) -> Self
    where
        F: FnOnce(&CancelToken) -> Option<R> + Send + 'static,
        C: FnOnce() + 'static,
    {
        let mut task = Self::spawn(pool, unit);
        task.cleanup = Some(Box::new(cleanup));
        task
    }
}

impl<R> CancellableTask<R> {
    /// Abort the unit cooperatively. Never blocks.
    ///
    /// A job still in the queue is skipped; a running one sees its token
    /// aborted. Cleanup still runs on the next poll or on drop.
    pub fn cancel(&mut self) {
        if self.state == TaskState::Running {
            self.token.abort();
            self.state = TaskState::Cancelled;
            debug!("Task cancelled");
        }
    }

    /// Check for completion without blocking
    pub fn poll(&mut self) -> TaskOutcome<R> {
        match self.state {
            TaskState::Cancelled => {
                self.run_cleanup();
                TaskOutcome::Cancelled
            }
            TaskState::Finished => TaskOutcome::Empty,
            TaskState::Running => match self.result.try_recv() {
                Ok(result) => {
                    self.state = TaskState::Finished;
                    self.run_cleanup();
                    match result {
                        Some(value) => TaskOutcome::Completed(value),
                        None => TaskOutcome::Empty,
                    }
                }
                Err(TryRecvError::Empty) => TaskOutcome::Pending,
                Err(TryRecvError::Disconnected) => {
                    self.state = TaskState::Finished;
                    self.run_cleanup();
                    TaskOutcome::Empty
                }
            },
        }
    }

    /// Block up to `timeout` for the unit to finish, then poll
    pub fn wait(&mut self, timeout: std::time::Duration) -> TaskOutcome<R> {
        if self.state == TaskState::Running {
            let deadline = std::time::Instant::now() + timeout;
            while std::time::Instant::now() < deadline && self.result.is_empty() {
                if self.result.is_disconnected() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        self.poll()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state == TaskState::Cancelled
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    fn run_cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        self.token.destroy();
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl<R> Drop for CancellableTask<R> {
    fn drop(&mut self) {
        if self.state == TaskState::Running {
            self.token.abort();
        }
        self.run_cleanup();
    }
}

impl<R> std::fmt::Debug for CancellableTask<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableTask")
            .field("state", &self.state)
            .field("aborted", &self.token.is_aborted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn completed_result_is_delivered_and_cleaned_up() {
        let pool = WorkerPool::new(1).unwrap();
        let cleanups = Rc::new(Cell::new(0));
        let counter = cleanups.clone();
        let mut task = CancellableTask::spawn_with_cleanup(
            &pool,
            |_| Some(40 + 2),
            move || counter.set(counter.get() + 1),
        );

        assert_eq!(task.wait(WAIT), TaskOutcome::Completed(42));
        assert!(task.token().is_destroyed());
        assert_eq!(task.poll(), TaskOutcome::Empty);
        drop(task);
        assert_eq!(cleanups.get(), 1);
    }

    #[test]
    fn none_result_skips_post_but_still_cleans_up() {
        let pool = WorkerPool::new(1).unwrap();
        let mut task: CancellableTask<u32> = CancellableTask::spawn(&pool, |_| None);
        assert_eq!(task.wait(WAIT), TaskOutcome::Empty);
        assert!(task.token().is_destroyed());
    }

    #[test]
    fn cancel_aborts_token_and_cleans_up_once() {
        let pool = WorkerPool::new(1).unwrap();
        let (release_tx, release_rx) = flume::bounded::<()>(1);
        let cleanups = Rc::new(Cell::new(0));
        let counter = cleanups.clone();

        let mut task = CancellableTask::spawn_with_cleanup(
            &pool,
            move |token| {
                let _ = release_rx.recv_timeout(WAIT);
                if token.is_aborted() { None } else { Some(1) }
            },
            move || counter.set(counter.get() + 1),
        );

        task.cancel();
        assert!(task.token().is_aborted());
        assert_eq!(task.poll(), TaskOutcome::Cancelled);
        assert_eq!(task.poll(), TaskOutcome::Cancelled);
        let _ = release_tx.send(());
        drop(task);
        assert_eq!(cleanups.get(), 1);
    }

    #[test]
    fn dropping_running_task_aborts_it() {
        let pool = WorkerPool::new(1).unwrap();
        let (release_tx, release_rx) = flume::bounded::<()>(1);
        let task: CancellableTask<()> = CancellableTask::spawn(&pool, move |_| {
            let _ = release_rx.recv_timeout(WAIT);
            Some(())
        });
        let token = task.token().clone();
        drop(task);
        assert!(token.is_aborted());
        assert!(token.is_destroyed());
        let _ = release_tx.send(());
    }

    #[test]
    fn panicking_unit_reports_empty() {
        let pool = WorkerPool::new(1).unwrap();
        let mut task: CancellableTask<u8> = CancellableTask::spawn(&pool, |_| panic!("boom"));
        assert_eq!(task.wait(WAIT), TaskOutcome::Empty);
    }
}
