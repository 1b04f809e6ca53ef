//! Blocking FIFO shared between the I/O thread and the application thread

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Mutex-protected double-ended queue with a condition variable for
/// consumers that want to sleep until something arrives.
///
/// Pushes never block and may come from any number of threads. Each
/// push wakes one waiting consumer.
#[derive(Debug, Default)]
pub struct ThreadSafeQueue<X> {
    items: Mutex<VecDeque<X>>,
    arrived: Condvar,
}

impl<X> ThreadSafeQueue<X> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    pub fn push_back(&self, item: X) {
        self.items.lock().push_back(item);
        self.arrived.notify_one();
    }

    pub fn push_front(&self, item: X) {
        self.items.lock().push_front(item);
        self.arrived.notify_one();
    }

    /// Remove the oldest element
    pub fn pop_front(&self) -> Result<X> {
        self.items.lock().pop_front().ok_or(Error::EmptyQueue)
    }

    /// Remove the newest element
    pub fn pop_back(&self) -> Result<X> {
        self.items.lock().pop_back().ok_or(Error::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Take every queued element in arrival order
    pub fn drain(&self) -> Vec<X> {
        self.items.lock().drain(..).collect()
    }

    /// Block the calling thread until at least one element is queued
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.arrived.wait(&mut items);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns true when the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.arrived.wait_until(&mut items, deadline).timed_out() {
                return !items.is_empty();
            }
        }
        true
    }
}

impl<X: Clone> ThreadSafeQueue<X> {
    /// Copy of the oldest element
    pub fn front(&self) -> Option<X> {
        self.items.lock().front().cloned()
    }

    /// Copy of the newest element
    pub fn back(&self) -> Option<X> {
        self.items.lock().back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = ThreadSafeQueue::new();
        for i in 0..5 {
            queue.push_back(i);
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.front(), Some(0));
        assert_eq!(queue.back(), Some(4));
        for i in 0..5 {
            assert_eq!(queue.pop_front().unwrap(), i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_empty_fails() {
        let queue: ThreadSafeQueue<u8> = ThreadSafeQueue::new();
        assert_eq!(queue.pop_front(), Err(Error::EmptyQueue));
        assert_eq!(queue.pop_back(), Err(Error::EmptyQueue));
        assert_eq!(queue.front(), None);
    }

    #[test]
    fn test_push_front_and_pop_back() {
        let queue = ThreadSafeQueue::new();
        queue.push_back(2);
        queue.push_front(1);
        queue.push_back(3);

        assert_eq!(queue.pop_back().unwrap(), 3);
        assert_eq!(queue.drain(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let queue = Arc::new(ThreadSafeQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..500u32 {
                        queue.push_back((p, seq));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 2000 {
            queue.wait();
            while let Ok(item) = queue.pop_front() {
                seen.push(item);
            }
        }
        for handle in producers {
            handle.join().unwrap();
        }

        assert_eq!(seen.len(), 2000);
        for p in 0..4u32 {
            let order: Vec<u32> = seen
                .iter()
                .filter(|(producer, _)| *producer == p)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(order, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_wait_released_by_push() {
        let queue = Arc::new(ThreadSafeQueue::new());

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                queue.wait();
                !queue.is_empty()
            })
        };

        thread::sleep(Duration::from_millis(50));
        queue.push_back("hello");

        assert!(consumer.join().unwrap());
        assert_eq!(queue.pop_front().unwrap(), "hello");
    }

    #[test]
    fn test_wait_timeout() {
        let queue: ThreadSafeQueue<u8> = ThreadSafeQueue::new();
        assert!(!queue.wait_timeout(Duration::from_millis(20)));

        queue.push_back(1);
        assert!(queue.wait_timeout(Duration::from_millis(20)));
    }
}
