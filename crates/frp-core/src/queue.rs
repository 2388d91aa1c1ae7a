//! Blocking work queue and one-shot completion latch. Ported from
//! `original_source/src/prf/concurrent_queue.hpp` (a `mutex` + a
//! `condition_variable` around a `std::queue`) and the `utils::Waiter`
//! used by `TransactionExecuteMessage`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// FIFO queue shared between the thread pool's producer side and its
/// worker threads. `pop` blocks until an item is available or the queue
/// is told to stop, mirroring the original's predicate-wait on
/// `!data.empty() || stop_the_threads`.
pub struct ConcurrentQueue<T> {
    data: Mutex<VecDeque<T>>,
    wait: Condvar,
    stopped: AtomicBool,
}

impl<T> ConcurrentQueue<T> {
    pub fn new() -> Self {
        ConcurrentQueue {
            data: Mutex::new(VecDeque::new()),
            wait: Condvar::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn push(&self, item: T) {
        let mut data = self.data.lock();
        data.push_back(item);
        self.wait.notify_one();
    }

    /// Blocks until an item is available or `notify_stop` has been
    /// called, in which case it returns `None`.
    pub fn pop(&self) -> Option<T> {
        let mut data = self.data.lock();
        loop {
            if let Some(item) = data.pop_front() {
                if !data.is_empty() {
                    self.wait.notify_one();
                }
                return Some(item);
            }
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            self.wait.wait(&mut data);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.data.lock().pop_front()
    }

    pub fn notify_stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wait.notify_all();
    }
}

/// A one-shot completion signal handed back from `ThreadPool::request`,
/// mirroring `utils::Waiter`.
pub struct Waiter {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Waiter {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn complete(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    pub fn finished(&self) -> bool {
        *self.done.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pop_blocks_until_a_push_arrives() {
        let q = Arc::new(ConcurrentQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.push(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn notify_stop_wakes_a_blocked_pop_with_none() {
        let q: Arc<ConcurrentQueue<i32>> = Arc::new(ConcurrentQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.notify_stop();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn waiter_wait_returns_after_complete() {
        let waiter = Waiter::new();
        let w2 = waiter.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            w2.complete();
        });
        waiter.wait();
        assert!(waiter.finished());
        handle.join().unwrap();
    }
}
