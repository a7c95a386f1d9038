//! Fixed-size worker thread pool for batched page operations.
//!
//! Adapted from a cooperative, no_std work-queue design to a plain
//! `std::thread` + `std::sync::mpsc` pool: a bounded number of worker
//! threads pull boxed closures off a shared channel and post their result
//! back on a per-job channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{NandError, NandResult};

type Job = Box<dyn FnOnce() -> JobResult + Send + 'static>;

/// A single unit of work the executor's caller cares about: the original
/// request, tagged with its outcome once it completes.
#[derive(Debug, Clone)]
pub enum JobResult {
    Ok(Vec<u8>),
    Err(NandError),
}

/// A handle to a submitted job's eventual result.
pub struct JobHandle {
    receiver: Receiver<JobResult>,
}

impl JobHandle {
    /// Blocks until the job completes.
    pub fn wait(self) -> NandResult<Vec<u8>> {
        match self.receiver.recv() {
            Ok(JobResult::Ok(data)) => Ok(data),
            Ok(JobResult::Err(e)) => Err(e),
            Err(_) => Err(NandError::Cancelled),
        }
    }
}

struct Shared {
    sender: Mutex<Option<Sender<Job>>>,
    shut_down: AtomicBool,
}

/// A fixed-size worker pool. `submit` enqueues a task; `wait` (via
/// [`JobHandle::wait`]) awaits its result; `shutdown` drains in-flight work
/// and rejects further submissions.
pub struct ParallelExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ParallelExecutor {
    pub fn new(max_workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            sender: Mutex::new(Some(sender)),
            shut_down: AtomicBool::new(false),
        });

        let workers = (0..max_workers.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                std::thread::spawn(move || loop {
                    let job = {
                        let guard = receiver.lock().unwrap();
                        guard.recv()
                    };
                    match job {
                        Ok(job) => {
                            job();
                        }
                        Err(_) => break,
                    }
                })
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submits `task` for execution on a worker thread. Fails with
    /// `ShutDown` if the executor has already been shut down.
    pub fn submit<F>(&self, task: F) -> NandResult<JobHandle>
    where
        F: FnOnce() -> NandResult<Vec<u8>> + Send + 'static,
    {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(NandError::ShutDown);
        }
        let (result_tx, result_rx) = mpsc::channel();
        let job: Job = Box::new(move || match task() {
            Ok(data) => JobResult::Ok(data),
            Err(e) => JobResult::Err(e),
        });

        let guard = self.shared.sender.lock().unwrap();
        let Some(sender) = guard.as_ref() else {
            return Err(NandError::ShutDown);
        };
        let wrapped: Job = Box::new(move || {
            let outcome = job();
            let _ = result_tx.send(outcome);
            JobResult::Ok(Vec::new())
        });
        sender
            .send(wrapped)
            .map_err(|_| NandError::ShutDown)?;
        Ok(JobHandle { receiver: result_rx })
    }

    pub fn wait_all(&self, handles: Vec<JobHandle>) -> Vec<NandResult<Vec<u8>>> {
        handles.into_iter().map(JobHandle::wait).collect()
    }

    /// Blocks until in-flight tasks finish and forbids further submission.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        self.shared.sender.lock().unwrap().take();
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ParallelExecutor {
    fn drop(&mut self) {
        if !self.shared.shut_down.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_and_wait_round_trips_result() {
        let executor = ParallelExecutor::new(2);
        let handle = executor.submit(|| Ok(vec![1, 2, 3])).unwrap();
        assert_eq!(handle.wait().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let executor = ParallelExecutor::new(2);
        executor.shutdown();
        assert!(matches!(
            executor.submit(|| Ok(Vec::new())),
            Err(NandError::ShutDown)
        ));
    }

    #[test]
    fn propagates_task_errors() {
        let executor = ParallelExecutor::new(1);
        let handle = executor
            .submit(|| Err(NandError::Uncorrectable))
            .unwrap();
        assert!(matches!(handle.wait(), Err(NandError::Uncorrectable)));
    }
}
