use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{lock_poisoned, Result};
use crate::types::{FeatureVector, Window};

/// Bounded FIFO of the most recent feature vectors.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    buffer: VecDeque<FeatureVector>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        SlidingWindow {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one vector, evicting the oldest entries beyond capacity.
    pub fn append(&mut self, vector: FeatureVector) {
        self.buffer.push_back(vector);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// Point-in-time copy of the contents, oldest first.
    pub fn snapshot(&self) -> Window {
        self.buffer.iter().copied().collect()
    }

    /// Keep only the most recent `retain` vectors.
    pub fn trim(&mut self, retain: usize) {
        let excess = self.buffer.len().saturating_sub(retain);
        self.buffer.drain(..excess);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full window available for inference.
    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.capacity
    }
}

/// Window shared between the sensor ingestion task and the prediction timer.
///
/// Every operation holds the lock for its whole duration, so a snapshot can
/// never observe a half-applied append.
#[derive(Debug, Clone)]
pub struct SharedWindow {
    inner: Arc<Mutex<SlidingWindow>>,
    capacity: usize,
}

impl SharedWindow {
    pub fn new(capacity: usize) -> Self {
        SharedWindow {
            inner: Arc::new(Mutex::new(SlidingWindow::new(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, vector: FeatureVector) -> Result<()> {
        self.with(|w| w.append(vector))
    }

    pub fn snapshot(&self) -> Result<Window> {
        self.with(|w| w.snapshot())
    }

    pub fn trim(&self, retain: usize) -> Result<()> {
        self.with(|w| w.trim(retain))
    }

    pub fn clear(&self) -> Result<()> {
        self.with(|w| w.clear())
    }

    pub fn len(&self) -> Result<usize> {
        self.with(|w| w.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.with(|w| w.is_empty())
    }

    fn with<T>(&self, f: impl FnOnce(&mut SlidingWindow) -> T) -> Result<T> {
        let mut window = self.inner.lock().map_err(|_| lock_poisoned("window"))?;
        Ok(f(&mut window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(i: usize) -> FeatureVector {
        [i as f64; 9]
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut window = SlidingWindow::new(128);
        for i in 0..1000 {
            window.append(vector(i));
            assert!(window.len() <= 128);
        }
        assert!(window.is_ready());
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut window = SlidingWindow::new(3);
        for i in 0..5 {
            window.append(vector(i));
        }
        let snapshot = window.snapshot();
        assert_eq!(snapshot, vec![vector(2), vector(3), vector(4)]);
    }

    #[test]
    fn test_trim_keeps_most_recent() {
        let mut window = SlidingWindow::new(128);
        for i in 0..128 {
            window.append(vector(i));
        }
        window.trim(64);
        assert_eq!(window.len(), 64);
        assert_eq!(window.snapshot()[0], vector(64));
        assert_eq!(window.snapshot()[63], vector(127));
        assert!(!window.is_ready());

        // Trimming to more than is held is a no-op
        window.trim(100);
        assert_eq!(window.len(), 64);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let shared = SharedWindow::new(4);
        shared.append(vector(1)).unwrap();
        let snapshot = shared.snapshot().unwrap();

        shared.append(vector(2)).unwrap();
        shared.clear().unwrap();

        assert_eq!(snapshot, vec![vector(1)]);
        assert!(shared.is_empty().unwrap());
    }

    #[test]
    fn test_concurrent_appends_and_snapshots() {
        let shared = SharedWindow::new(128);
        let producer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..5000 {
                    shared.append(vector(i)).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let snapshot = shared.snapshot().unwrap();
            assert!(snapshot.len() <= 128);
            // Always a contiguous, time-ordered suffix
            for pair in snapshot.windows(2) {
                assert_eq!(pair[1][0] - pair[0][0], 1.0);
            }
        }
        producer.join().unwrap();
        assert_eq!(shared.len().unwrap(), 128);
    }
}
