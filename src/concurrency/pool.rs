/*!
A bounded worker pool with three priority classes.
*/

use crate::config::ThreadPoolConfig;
use crate::error::Error;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// The three priority classes a job may be submitted at. Within a class, jobs run FIFO
///.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum JobPriority {
    Low = 0,
    Medium = 1,
    High = 2,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queues {
    high: VecDeque<Job>,
    medium: VecDeque<Job>,
    low: VecDeque<Job>,
}

impl Queues {
    fn new() -> Self {
        Queues {
            high: VecDeque::new(),
            medium: VecDeque::new(),
            low: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    fn push(&mut self, priority: JobPriority, job: Job) {
        match priority {
            JobPriority::High => self.high.push_back(job),
            JobPriority::Medium => self.medium.push_back(job),
            JobPriority::Low => self.low.push_back(job),
        }
    }

    fn pop(&mut self) -> Option<Job> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

struct Shared {
    queues: Mutex<Queues>,
    condvar: Condvar,
    shutdown: AtomicBool,
    max_jobs_total: usize,
    active_jobs: AtomicUsize,
}

///
/// A bounded thread pool with HIGH/MED/LOW priority queues. One pool is created per
/// [`CoreContext`](crate::CoreContext).
///
#[derive(Debug)]
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .field("max_jobs_total", &self.max_jobs_total)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl ThreadPool {
    pub fn new(config: &ThreadPoolConfig) -> Self {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
            max_jobs_total: config.max_jobs_total,
            active_jobs: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(config.min_threads);
        for n in 0..config.min_threads.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("upnp-worker-{}", n))
                .stack_size(config.stack_size)
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        ThreadPool { shared, workers }
    }

    /// Submit a job at the given priority. Returns `Shutdown` without enqueueing if the pool
    /// has already been told to shut down, or `BufferTooSmall` if the bounded queue is full
    ///.
    pub fn add_job<F>(&self, priority: JobPriority, job: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Finish);
        }
        let mut queues = self.shared.queues.lock().unwrap();
        if queues.len() >= self.shared.max_jobs_total {
            return Err(Error::BufferTooSmall);
        }
        queues.push(priority, Box::new(job));
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Number of jobs currently queued (not counting ones a worker has already picked up).
    pub fn queue_len(&self) -> usize {
        self.shared.queues.lock().unwrap().len()
    }

    /// Joins every worker thread, as `UpnpFinish` does. Jobs already running are
    /// allowed to complete; queued jobs are dropped (and, being `Box<dyn FnOnce>`, their
    /// captured state is freed) without executing.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let mut queues = self.shared.queues.lock().unwrap();
            queues.high.clear();
            queues.medium.clear();
            queues.low.clear();
        }
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queues = shared.queues.lock().unwrap();
            loop {
                if let Some(job) = queues.pop() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                queues = shared.condvar.wait(queues).unwrap();
            }
        };
        match job {
            Some(job) => {
                shared.active_jobs.fetch_add(1, Ordering::SeqCst);
                // A panicking callback must not take the worker down with it:
                // contain it the way a library boundary would.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                if let Err(panic) = result {
                    error!("worker job panicked: {:?}", panic_message(&panic));
                }
                shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
            }
            None => break,
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn jobs_run_and_can_be_awaited() {
        let pool = ThreadPool::new(&ThreadPoolConfig::default());
        let (tx, rx) = channel();
        pool.add_job(JobPriority::Medium, move || {
            tx.send(42).unwrap();
        })
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn shutdown_rejects_new_jobs() {
        let mut pool = ThreadPool::new(&ThreadPoolConfig::default());
        pool.shutdown();
        let result = pool.add_job(JobPriority::Low, || {});
        assert!(matches!(result, Err(Error::Finish)));
    }

    #[test]
    fn high_priority_runs_before_low_when_queued_first() {
        let mut config = ThreadPoolConfig::default();
        config.min_threads = 1;
        let pool = ThreadPool::new(&config);
        let (tx, rx) = channel();

        // Block the single worker so both jobs queue up before either runs.
        let (block_tx, block_rx) = channel::<()>();
        pool.add_job(JobPriority::Medium, move || {
            let _ = block_rx.recv();
        })
        .unwrap();
        thread::sleep(Duration::from_millis(50));

        let tx_low = tx.clone();
        pool.add_job(JobPriority::Low, move || tx_low.send("low").unwrap())
            .unwrap();
        let tx_high = tx.clone();
        pool.add_job(JobPriority::High, move || tx_high.send("high").unwrap())
            .unwrap();

        block_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "high");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "low");
    }
}
