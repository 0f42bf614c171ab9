//! Bounded worker pool for off-request background work.
//!
//! A small fixed set of tokio tasks drains a bounded queue. When the queue
//! is full, the submitting caller runs the job itself instead of dropping it
//! or queuing without bound — that is the backpressure policy. On shutdown,
//! pending jobs get a grace period before remaining workers are aborted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks over a queue of `queue_capacity` pending jobs.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = std::sync::Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        }
    }

    /// Submit a job.
    ///
    /// If the queue has room the job runs on a pool worker and this call
    /// returns immediately. If the queue is full (or the pool has been shut
    /// down) the job runs to completion on the calling task before this
    /// call returns.
    pub async fn submit<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::pin(fut);
        let sender = self.sender.lock().unwrap().clone();

        let Some(sender) = sender else {
            tracing::warn!("worker pool is shut down, running job on the caller");
            job.await;
            return;
        };

        match sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!("worker queue full, running job on the caller");
                job.await;
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!("worker queue closed, running job on the caller");
                job.await;
            }
        }
    }

    /// Stop accepting work and wait up to `grace` for queued jobs to finish;
    /// workers still running after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let sender = self.sender.lock().unwrap().take();
        drop(sender);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        let deadline = tokio::time::Instant::now() + grace;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!("worker did not finish within the grace period, aborting");
                handle.abort();
            }
        }
    }
}
