//! Bounded frame queue shared by every device variant
//!
//! A fixed-capacity crossbeam channel. One acquisition thread pushes, one
//! consumer pops. The queue never grows: a push into a full queue discards a
//! frame according to the [`OverflowPolicy`] and reports the overflow to the
//! producer.

use crate::config::OverflowPolicy;
use crate::types::{Frame, MonitorError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Window over which the received frame rate is measured
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Counters describing queue traffic
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStats {
    /// Frames offered to the queue
    pub received: u64,
    /// Frames discarded because the queue was full
    pub dropped: u64,
    /// Frames currently waiting
    pub queued: usize,
    /// Frames per second offered over the last complete rate window
    pub rate: f64,
}

/// Frame rate over consecutive fixed windows, sampled by an acquisition loop
#[derive(Debug)]
pub(crate) struct RateMeter {
    window: Duration,
    started: Instant,
    base: u64,
}

impl RateMeter {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            base: 0,
        }
    }

    /// Rate since the window opened, once the window has elapsed
    pub(crate) fn sample(&mut self, received: u64, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }
        let rate = received.saturating_sub(self.base) as f64 / elapsed.as_secs_f64();
        self.started = now;
        self.base = received;
        Some(rate)
    }
}

pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    policy: OverflowPolicy,
    received: AtomicU64,
    dropped: AtomicU64,
    /// `f64` bits of the last measured rate
    rate: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            policy,
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rate: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Offer a frame without blocking
    ///
    /// Returns [`MonitorError::FrameQueueOverflow`] when a frame had to be
    /// discarded. With `DropNewest` the offered frame is the one lost; with
    /// `DropOldest` the oldest queued frame is evicted and `frame` is queued.
    pub fn push(&self, frame: Frame) -> Result<()> {
        self.received.fetch_add(1, Ordering::Relaxed);

        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                let lost = match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        Some(frame.id())
                    }
                    OverflowPolicy::DropOldest => self.evict_for(frame),
                };
                match lost {
                    Some(id) => Err(MonitorError::FrameQueueOverflow {
                        id,
                        capacity: self.capacity,
                    }),
                    None => Ok(()),
                }
            }
            // Both ends live in this struct
            Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }

    /// Make room for `frame` by evicting the oldest queued frame
    ///
    /// Returns the id of the frame lost, or `None` when the consumer freed a
    /// slot first and nothing had to go.
    fn evict_for(&self, frame: Frame) -> Option<u32> {
        let evicted = self.rx.try_recv().ok();
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => evicted.map(|f| f.id()),
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Some(e.into_inner().id())
            }
        }
    }

    /// Block until a frame is available or `timeout` elapses
    pub fn pop(&self, timeout: Duration) -> Result<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(MonitorError::Timeout(timeout))
            }
        }
    }

    /// Discard the frames queued at the time of the call
    ///
    /// Frames pushed concurrently after the snapshot are kept.
    pub fn clear(&self) -> usize {
        let pending = self.rx.len();
        let mut cleared = 0;
        for _ in 0..pending {
            if self.rx.try_recv().is_err() {
                break;
            }
            cleared += 1;
        }
        if cleared > 0 {
            log::debug!("Cleared {} queued frames", cleared);
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queued: self.rx.len(),
            rate: f64::from_bits(self.rate.load(Ordering::Relaxed)),
        }
    }

    /// Refresh the published rate when the meter's window has elapsed
    pub(crate) fn update_rate(&self, meter: &mut RateMeter) {
        let received = self.received.load(Ordering::Relaxed);
        if let Some(rate) = meter.sample(received, Instant::now()) {
            self.rate.store(rate.to_bits(), Ordering::Relaxed);
            log::debug!(
                "Receiving {:.1} frames/s ({} dropped, {} queued)",
                rate,
                self.dropped.load(Ordering::Relaxed),
                self.rx.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn frame(id: u32) -> Frame {
        Frame::new(id, &[id as u8], Duration::from_micros(id as u64)).unwrap()
    }

    #[test]
    fn test_drop_newest_keeps_oldest_frames() {
        let queue = FrameQueue::new(2, OverflowPolicy::DropNewest);
        let results: Vec<_> = [1, 2, 3].into_iter().map(|id| queue.push(frame(id))).collect();

        let overflows = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(overflows, 1);
        assert!(matches!(
            results[2],
            Err(MonitorError::FrameQueueOverflow { id: 3, capacity: 2 })
        ));

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout).unwrap().id(), 1);
        assert_eq!(queue.pop(timeout).unwrap().id(), 2);
        assert!(matches!(queue.pop(timeout), Err(MonitorError::Timeout(_))));
    }

    #[test]
    fn test_drop_oldest_keeps_newest_frames() {
        let queue = FrameQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(frame(1)).unwrap();
        queue.push(frame(2)).unwrap();
        let result = queue.push(frame(3));
        assert!(matches!(result, Err(MonitorError::FrameQueueOverflow { id: 1, .. })));

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout).unwrap().id(), 2);
        assert_eq!(queue.pop(timeout).unwrap().id(), 3);
    }

    #[test]
    fn test_drop_oldest_without_eviction_loses_nothing() {
        let queue = FrameQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(frame(1)).unwrap();
        queue.push(frame(2)).unwrap();
        // Consumer frees a slot between the full push and the eviction
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().id(), 1);

        assert_eq!(queue.evict_for(frame(3)), None);
        assert_eq!(queue.stats().dropped, 0);

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout).unwrap().id(), 2);
        assert_eq!(queue.pop(timeout).unwrap().id(), 3);
    }

    #[test]
    fn test_clear_alongside_producer_keeps_order() {
        let queue = Arc::new(FrameQueue::new(64, OverflowPolicy::DropNewest));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for id in 0..2000u32 {
                    while queue.len() >= queue.capacity() {
                        thread::yield_now();
                    }
                    queue.push(frame(id)).unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        let mut cleared = 0;
        let timeout = Duration::from_millis(200);
        while !producer.is_finished() || !queue.is_empty() {
            cleared += queue.clear();
            if let Ok(f) = queue.pop(timeout) {
                seen.push(f.id());
            }
        }
        producer.join().unwrap();

        // Every frame is either cleared once or popped once, in push order
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.len() + cleared, 2000);
        assert_eq!(queue.stats().dropped, 0);
    }

    #[test]
    fn test_rate_meter_windows() {
        let mut meter = RateMeter::new(Duration::from_secs(1));
        let start = meter.started;
        assert_eq!(meter.sample(100, start + Duration::from_millis(500)), None);
        assert_eq!(meter.sample(200, start + Duration::from_secs(2)), Some(100.0));
        assert_eq!(meter.sample(700, start + Duration::from_secs(3)), Some(500.0));
    }

    #[test]
    fn test_clear_discards_queued_frames() {
        let queue = FrameQueue::new(8, OverflowPolicy::DropNewest);
        for id in 0..5 {
            queue.push(frame(id)).unwrap();
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());

        let stats = queue.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.queued, 0);
    }

    #[test]
    fn test_pop_times_out_on_empty_queue() {
        let queue = FrameQueue::new(1, OverflowPolicy::DropNewest);
        let result = queue.pop(Duration::from_millis(5));
        assert!(matches!(result, Err(MonitorError::Timeout(_))));
    }
}
