//! A fixed-size worker pool for per-stream work.
//!
//! Workers pull element indices from a shared monotonic counter until the
//! sequence is exhausted. An optional score function orders the queue
//! largest-first, which balances long-tailed workloads where a few huge
//! streams dominate the total. The pool is created and joined per call; no
//! state survives between invocations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Fraction of the detected hardware concurrency used by default.
const DEFAULT_THREAD_RATIO: (usize, usize) = (3, 4);

/// Executes an action over a sequence of elements on a pool of OS threads.
pub struct ParallelRunner {
    num_threads: usize,
}

impl ParallelRunner {
    /// Creates a runner with the given worker count, or the default of 3/4 of
    /// the available hardware concurrency.
    pub fn new(num_threads: Option<u32>) -> Self {
        let num_threads = match num_threads {
            Some(count) => count.max(1) as usize,
            None => {
                let cores = thread::available_parallelism().map_or(1, |n| n.get());
                (cores * DEFAULT_THREAD_RATIO.0 / DEFAULT_THREAD_RATIO.1).max(1)
            }
        };
        ParallelRunner { num_threads }
    }

    /// The worker count this runner dispatches to.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `action` once per element, in index order of arrival.
    pub fn execute<T, E, A>(&self, items: &[T], action: A) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        A: Fn(&T, usize) -> Result<(), E> + Sync,
    {
        let order = (0..items.len()).collect();
        self.run(items, order, action)
    }

    /// Runs `action` once per element, dispatching high-scoring elements
    /// first.
    pub fn execute_scored<T, E, S, A>(&self, items: &[T], score: S, action: A) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        S: Fn(&T, usize) -> u32,
        A: Fn(&T, usize) -> Result<(), E> + Sync,
    {
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by_key(|&index| std::cmp::Reverse(score(&items[index], index)));
        self.run(items, order, action)
    }

    fn run<T, E, A>(&self, items: &[T], order: Vec<usize>, action: A) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        A: Fn(&T, usize) -> Result<(), E> + Sync,
    {
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let failure = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..self.num_threads {
                scope.spawn(|| loop {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }
                    let slot = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&index) = order.get(slot) else {
                        break;
                    };
                    if let Err(err) = action(&items[index], index) {
                        failed.store(true, Ordering::Relaxed);
                        let mut failure = failure.lock().unwrap();
                        if failure.is_none() {
                            *failure = Some(err);
                        }
                        break;
                    }
                });
            }
        });

        match failure.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
