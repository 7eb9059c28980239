//! Serialized execution of hosted calls.
//!
//! Every inbound invocation of a space runs on one worker task, one at a
//! time, in arrival order. Inbound results never go through the worker,
//! so a hosted method can call back into its caller and wait for the
//! answer, as long as the caller's worker is free to run the callback.
//! Re-entering a space whose worker is busy with this very chain (A calls
//! B, B calls A, A calls B again) waits until the response timeout.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

pub struct Worker {
    name: String,
    jobs: mpsc::UnboundedSender<Job>,
    completed: Arc<AtomicU64>,
}

impl Worker {
    /// Start the worker task. Requires a Tokio runtime.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let completed = Arc::new(AtomicU64::new(0));

        let task_name = name.clone();
        let counter = Arc::clone(&completed);
        tokio::spawn(async move {
            debug!(worker = %task_name, "Worker started");
            while let Some(job) = queue.recv().await {
                if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                    error!(
                        worker = %task_name,
                        panic = %panic_message(panic.as_ref()),
                        "Hosted call panicked"
                    );
                }
                counter.fetch_add(1, Ordering::Relaxed);
            }
            debug!(worker = %task_name, "Worker stopped");
        });

        Self {
            name,
            jobs,
            completed,
        }
    }

    /// Queue a job. Returns false once the worker has stopped.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.send(Box::pin(job)).is_ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs finished so far, panicked ones included.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
