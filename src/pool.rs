// ============================================================================
// WORKER POOL: bounded rayon pool with drain and panic collection
// ============================================================================
//
// The render orchestrator needs three things from its pool: submit a work
// item, block until everything submitted has finished, and find out
// afterwards whether any item blew up.  Rayon provides the threads; the
// outstanding-job counter and panic buffer here provide the rest.
//
// Work items are wrapped in `catch_unwind` so a panicking effect kernel
// never takes down an OS thread (or the process): the payload is captured
// as a string and surfaced to whoever calls `take_panics()` after a drain.

use std::sync::{Arc, Condvar, Mutex};

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    tracker: Arc<JobTracker>,
}

struct JobTracker {
    pending: Mutex<usize>,
    idle: Condvar,
    panics: Mutex<Vec<String>>,
}

impl WorkerPool {
    /// Build a pool with exactly `threads` OS threads.
    pub fn new(threads: usize) -> Result<Self, String> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("renderfe-worker-{}", i))
            .build()
            .map_err(|e| format!("failed to build worker pool: {}", e))?;
        Ok(WorkerPool {
            pool,
            tracker: Arc::new(JobTracker {
                pending: Mutex::new(0),
                idle: Condvar::new(),
                panics: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Submit a work item.  Returns immediately; the item runs on one of
    /// the pool's threads.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        {
            let mut pending = self.tracker.pending.lock().unwrap();
            *pending += 1;
        }
        let tracker = self.tracker.clone();
        self.pool.spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
            if let Err(payload) = result {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                crate::log_err!("worker panicked: {}", msg);
                tracker.panics.lock().unwrap().push(msg);
            }
            let mut pending = tracker.pending.lock().unwrap();
            *pending -= 1;
            if *pending == 0 {
                tracker.idle.notify_all();
            }
        });
    }

    /// Number of submitted items that have not finished yet.
    pub fn pending(&self) -> usize {
        *self.tracker.pending.lock().unwrap()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Block until every submitted item has finished.
    pub fn drain(&self) {
        let mut pending = self.tracker.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.tracker.idle.wait(pending).unwrap();
        }
    }

    /// Take the panic messages collected since the last call.
    pub fn take_panics(&self) -> Vec<String> {
        std::mem::take(&mut *self.tracker.panics.lock().unwrap())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn drain_waits_for_all_submitted_jobs() {
        let pool = WorkerPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert!(pool.is_idle());
    }

    #[test]
    fn drain_on_idle_pool_returns_immediately() {
        let pool = WorkerPool::new(2).unwrap();
        pool.drain();
        assert!(pool.is_idle());
    }

    #[test]
    fn panicking_job_is_captured_not_propagated() {
        let pool = WorkerPool::new(2).unwrap();
        pool.submit(|| panic!("kernel exploded"));
        pool.submit(|| {});
        pool.drain();
        let panics = pool.take_panics();
        assert_eq!(panics.len(), 1);
        assert!(panics[0].contains("kernel exploded"));
        // Second call sees nothing: the buffer was taken.
        assert!(pool.take_panics().is_empty());
    }

    #[test]
    fn pool_threads_are_bounded() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.thread_count(), 2);
        // Zero requested threads still yields a working single-thread pool.
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.thread_count(), 1);
    }
}
