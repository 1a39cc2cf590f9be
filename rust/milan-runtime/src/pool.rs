//! Fixed-size worker pool with a bounded job queue.
//!
//! Jobs are fire-and-forget futures; completion is surfaced by whatever
//! promise the submitter baked into the job. A job's context travels
//! with the job itself (the submitter wraps its future in a
//! [`Context::scope`]), never with the worker that happens to run it.

use std::future::Future;
use std::pin::Pin;

use milan_wire::Result;
use tracing::debug;

use crate::context::Context;
use crate::queue::BoundedQueue;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A fixed set of worker tasks draining one bounded queue.
pub struct WorkerPool {
    jobs: BoundedQueue<Job>,
    ctx: Context,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `queue_capacity` jobs.
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let jobs: BoundedQueue<Job> = BoundedQueue::new(queue_capacity.max(1));
        let ctx = Context::root().child();

        for worker in 0..workers.max(1) {
            let jobs = jobs.clone();
            let worker_ctx = ctx.child();
            tokio::spawn(worker_ctx.scope(async move {
                loop {
                    match jobs.get().await {
                        Ok(job) => job.await,
                        Err(e) => {
                            debug!(worker, error = %e, "worker draining out");
                            break;
                        }
                    }
                }
            }));
        }

        WorkerPool { jobs, ctx }
    }

    /// Enqueue a job, blocking under the caller's context while the
    /// queue is full. This is the pool's backpressure point.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.put(Box::pin(job)).await
    }

    /// Enqueue without blocking; `try_again` when the queue is full.
    pub fn try_submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.maybe_put(Box::pin(job))
    }

    /// Stop accepting jobs and wind the workers down. Jobs already
    /// queued still run.
    pub fn shutdown(&self) {
        self.jobs.close();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.close();
        self.ctx.cancel();
    }
}
