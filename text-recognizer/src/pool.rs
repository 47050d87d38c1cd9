//! Reusable scratch buffers for normalisation output.
//!
//! Preprocessing produces one `3*h*w` float buffer per patch; recycling
//! them keeps the batch path from allocating per call. Buffers are keyed by
//! next-power-of-two size class and handed out zeroed.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

const MAX_PER_CLASS: usize = 8;

#[derive(Debug, Default)]
pub struct BufferPool {
    classes: Mutex<HashMap<usize, Vec<Vec<f32>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a zeroed buffer of length exactly `n`.
    ///
    /// Capacity follows the size class, so a returned buffer can be reused
    /// by any request of the same class.
    pub fn get(&self, n: usize) -> Vec<f32> {
        let class = size_class(n);
        let mut classes = self.classes.lock().expect("buffer pool poisoned");
        if let Some(mut buf) = classes.get_mut(&class).and_then(Vec::pop) {
            buf.clear();
            buf.resize(n, 0.0);
            return buf;
        }
        drop(classes);

        let mut buf = Vec::with_capacity(class);
        buf.resize(n, 0.0);
        buf
    }

    /// Return a buffer. The caller must not touch it afterwards.
    pub fn put(&self, buf: Vec<f32>) {
        let class = size_class(buf.capacity());
        if class == 0 {
            return;
        }
        let mut classes = self.classes.lock().expect("buffer pool poisoned");
        let free = classes.entry(class).or_default();
        if free.len() < MAX_PER_CLASS {
            free.push(buf);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.classes
            .lock()
            .unwrap()
            .values()
            .map(Vec::len)
            .sum()
    }
}

fn size_class(n: usize) -> usize {
    n.next_power_of_two()
}

/// Process-wide pool shared by every recognizer.
pub fn scratch_pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(BufferPool::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn get_returns_exact_length() {
        let pool = BufferPool::new();
        let buf = pool.get(100);
        assert_eq!(buf.len(), 100);
        assert!(buf.capacity() >= 128);
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn put_then_get_reuses_and_zeroes() {
        let pool = BufferPool::new();
        let mut buf = pool.get(64);
        buf.iter_mut().for_each(|v| *v = 7.0);
        pool.put(buf);
        assert_eq!(pool.pooled(), 1);

        let again = pool.get(60);
        assert_eq!(again.len(), 60);
        assert!(again.iter().all(|&v| v == 0.0));
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn free_lists_are_bounded() {
        let pool = BufferPool::new();
        for _ in 0..(MAX_PER_CLASS + 4) {
            pool.put(vec![0.0; 64]);
        }
        assert_eq!(pool.pooled(), MAX_PER_CLASS);
    }

    #[test]
    fn concurrent_get_put() {
        let pool = Arc::new(BufferPool::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for round in 0..100 {
                        let n = 16 << (i % 4);
                        let mut buf = pool.get(n);
                        assert_eq!(buf.len(), n);
                        buf[0] = round as f32;
                        pool.put(buf);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
