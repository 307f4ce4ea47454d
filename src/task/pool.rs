//! Worker threads for background units

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use flume::{Receiver, Sender};
use log::{debug, error};

use super::CancelToken;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum PoolMessage {
    Run { token: CancelToken, job: Job },
    Shutdown,
}

/// Fixed set of worker threads pulling jobs from one shared queue
pub struct WorkerPool {
    queue: Sender<PoolMessage>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize) -> std::io::Result<Self> {
        // flume gives us MPMC: every worker clones the receiver and pulls from
        // the same queue, which std::sync::mpsc cannot do.
        let (queue, jobs) = flume::unbounded();
        let num_workers = threads.max(1);

        for i in 0..num_workers {
            let rx = jobs.clone();
            thread::Builder::new()
                .name(format!("docpager-worker-{i}"))
                .spawn(move || worker_loop(&rx))?;
        }

        Ok(Self { queue, num_workers })
    }

    /// Queue a job. It is skipped if `token` is aborted before a worker picks it up.
    pub fn submit(&self, token: CancelToken, job: impl FnOnce() + Send + 'static) {
        let message = PoolMessage::Run {
            token,
            job: Box::new(job),
        };
        if self.queue.send(message).is_err() {
            error!("Worker pool queue closed; dropping job");
        }
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Jobs waiting for a worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Ask every worker to exit once the queue ahead of it drains
    pub fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.queue.send(PoolMessage::Shutdown);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_workers", &self.num_workers)
            .field("queued", &self.queue.len())
            .finish()
    }
}

fn worker_loop(jobs: &Receiver<PoolMessage>) {
    for message in jobs.iter() {
        match message {
            PoolMessage::Run { token, job } => {
                if token.is_aborted() {
                    debug!("Skipping job aborted before it started");
                    continue;
                }
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Background job panicked; its task will report no result");
                }
            }
            PoolMessage::Shutdown => break,
        }
    }
}
