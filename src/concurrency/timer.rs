/*!
A timer wheel: a single priority queue keyed by absolute deadline, handing due jobs to the
thread pool at their recorded priority class.
*/

use crate::concurrency::{JobPriority, ThreadPool};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// Whether a requested delay is relative to now or an absolute deadline.
#[derive(Clone, Copy, Debug)]
pub enum TimerKind {
    Relative,
    Absolute,
}

/// Opaque handle returned by [`TimerWheel::schedule`], used to cancel with [`TimerWheel::remove`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TimerHandle(u64);

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    handle: TimerHandle,
    deadline: Instant,
    priority: JobPriority,
    job: Option<Job>,
}

impl Eq for Entry {}
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; we want the earliest deadline to pop first.
        other.deadline.cmp(&self.deadline)
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Entry>>,
    condvar: Condvar,
    shutdown: AtomicBool,
    next_handle: AtomicU64,
}

///
/// Owns a background thread that dequeues due jobs and hands them to a [`ThreadPool`]
///.
///
#[derive(Debug)]
pub struct TimerWheel {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl TimerWheel {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("upnp-timer".to_string())
            .spawn(move || timer_loop(thread_shared, pool))
            .expect("failed to spawn timer thread");

        TimerWheel {
            shared,
            thread: Some(thread),
        }
    }

    /// Schedule `job` to run at `priority` after `delay` (or at the absolute instant `delay`
    /// represents when `kind` is `Absolute`, measured as an offset from "now" at call time,
    /// since this crate has no epoch-relative `Instant`).
    pub fn schedule<F>(
        &self,
        delay: Duration,
        kind: TimerKind,
        priority: JobPriority,
        job: F,
    ) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = match kind {
            TimerKind::Relative => Instant::now() + delay,
            TimerKind::Absolute => Instant::now() + delay,
        };
        let handle = TimerHandle(self.shared.next_handle.fetch_add(1, Ordering::SeqCst));
        let entry = Entry {
            handle,
            deadline,
            priority,
            job: Some(Box::new(job)),
        };
        {
            let mut heap = self.shared.heap.lock().unwrap();
            heap.push(entry);
        }
        self.shared.condvar.notify_all();
        handle
    }

    /// Cancel a not-yet-fired job. A job that has already begun execution cannot be
    /// cancelled. Returns `true` if the job was found and removed.
    pub fn remove(&self, handle: TimerHandle) -> bool {
        let mut heap = self.shared.heap.lock().unwrap();
        let items: Vec<Entry> = heap.drain().collect();
        let mut found = false;
        for mut entry in items {
            if entry.handle == handle {
                found = true;
                // Dropping `entry.job` here runs its free-routine (Rust's Drop glue over
                // whatever state the closure captured) without ever invoking it.
                entry.job.take();
            } else {
                heap.push(entry);
            }
        }
        found
    }

    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.heap.lock().unwrap().clear();
        self.shared.condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

fn timer_loop(shared: Arc<Shared>, pool: Arc<ThreadPool>) {
    loop {
        let due = {
            let mut heap = shared.heap.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match heap.peek() {
                    None => {
                        let (guard, _timeout) = shared
                            .condvar
                            .wait_timeout(heap, Duration::from_millis(500))
                            .unwrap();
                        heap = guard;
                    }
                    Some(entry) => {
                        let now = Instant::now();
                        if entry.deadline <= now {
                            break heap.pop();
                        } else {
                            let wait = entry.deadline - now;
                            let (guard, _timeout) =
                                shared.condvar.wait_timeout(heap, wait).unwrap();
                            heap = guard;
                        }
                    }
                }
            }
        };
        if let Some(mut entry) = due {
            if let Some(job) = entry.job.take() {
                let priority = entry.priority;
                // Handing off to the pool at the job's recorded priority class.
                let _ = pool.add_job(priority, job);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadPoolConfig;
    use std::sync::mpsc::channel;

    #[test]
    fn fires_after_delay() {
        let pool = Arc::new(ThreadPool::new(&ThreadPoolConfig::default()));
        let mut timer = TimerWheel::new(Arc::clone(&pool));
        let (tx, rx) = channel();
        timer.schedule(Duration::from_millis(50), TimerKind::Relative, JobPriority::Medium, move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        timer.shutdown();
    }

    #[test]
    fn cancelled_job_never_runs() {
        let pool = Arc::new(ThreadPool::new(&ThreadPoolConfig::default()));
        let mut timer = TimerWheel::new(Arc::clone(&pool));
        let (tx, rx) = channel::<()>();
        let handle = timer.schedule(
            Duration::from_millis(100),
            TimerKind::Relative,
            JobPriority::Medium,
            move || {
                tx.send(()).unwrap();
            },
        );
        assert!(timer.remove(handle));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        timer.shutdown();
    }
}
