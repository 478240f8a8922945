/*!
The concurrency substrate shared by every protocol layer: a bounded, priority-queued thread pool
and a timer wheel built on top of it.

There is no cooperative single-threaded event loop here; every blocking operation either runs on
its own OS thread or is handed to the pool as a job.
*/

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod pool;
pub use pool::{JobPriority, ThreadPool};

mod timer;
pub use timer::{TimerHandle, TimerKind, TimerWheel};
