//! Fixed-size worker pool. Ported from `original_source/src/thread_pool.hpp`.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::queue::{ConcurrentQueue, Waiter};

pub const MINIMUM_NUMBER_OF_THREADS_ON_AUTOMATIC: usize = 4;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    task: Task,
    waiter: Arc<Waiter>,
}

pub struct ThreadPool {
    queue: Arc<ConcurrentQueue<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(number_of_threads: usize) -> Self {
        let queue: Arc<ConcurrentQueue<Job>> = Arc::new(ConcurrentQueue::new());
        let workers = (0..number_of_threads)
            .map(|idx| {
                let queue = queue.clone();
                std::thread::Builder::new()
                    .name(format!("frp-pool-{idx}"))
                    .spawn(move || {
                        while let Some(job) = queue.pop() {
                            (job.task)();
                            job.waiter.complete();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        ThreadPool { queue, workers }
    }

    /// Picks `max(num_cpus, MINIMUM_NUMBER_OF_THREADS_ON_AUTOMATIC)`
    /// workers, matching `ThreadPool::create_suitable_pool`.
    pub fn create_suitable_pool() -> Self {
        let n = num_cpus::get().max(MINIMUM_NUMBER_OF_THREADS_ON_AUTOMATIC);
        Self::new(n)
    }

    pub fn request(&self, task: impl FnOnce() + Send + 'static) -> Arc<Waiter> {
        let waiter = Waiter::new();
        self.queue.push(Job {
            task: Box::new(task),
            waiter: waiter.clone(),
        });
        waiter
    }

    pub fn stop(&mut self) {
        self.queue.notify_stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn requested_jobs_all_complete() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let waiters: Vec<_> = (0..16)
            .map(|_| {
                let counter = counter.clone();
                pool.request(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for w in waiters {
            w.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
