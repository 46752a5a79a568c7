// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-device sample queues
//!
//! Each tracked child device gets one bounded, lossy FIFO. The hardware
//! thread pushes, the aggregation thread pops; neither ever blocks on the
//! other for longer than one `VecDeque` operation. When the queue is full
//! the oldest sample is discarded so the consumer always sees the most
//! recent history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};

use crate::hardware::DeviceListener;
use crate::metrics::SessionMetrics;
use crate::types::{DeviceIdentity, OrientationSample, Quaternion};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 300;

/// Wake-up signal raised whenever any queue receives data
///
/// Producers never wait on it. The aggregator waits with a timeout, so a
/// missed wake-up costs at most one tick interval.
#[derive(Debug, Default)]
pub struct DataSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl DataSignal {
    /// Create a lowered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake a waiter
    pub fn notify(&self) {
        *self.pending.lock().unwrap() = true;
        self.cond.notify_one();
    }

    /// Wait until raised or `timeout` elapses, then lower it
    ///
    /// Returns true if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.pending.lock().unwrap();
        let (mut pending, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap();
        std::mem::replace(&mut *pending, false)
    }
}

#[derive(Debug)]
struct QueueState {
    buffer: VecDeque<OrientationSample>,
    next_sequence: u64,
    dropped: u64,
}

/// Bounded, lossy FIFO of samples for one device
#[derive(Debug)]
pub struct SampleQueue {
    device: DeviceIdentity,
    capacity: usize,
    state: Mutex<QueueState>,
    closed: AtomicBool,
    signal: Option<Arc<DataSignal>>,
    metrics: Option<Arc<SessionMetrics>>,
}

impl SampleQueue {
    /// Create a queue for `device` holding at most `capacity` samples
    pub fn new(device: DeviceIdentity, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            device,
            capacity,
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                next_sequence: 0,
                dropped: 0,
            }),
            closed: AtomicBool::new(false),
            signal: None,
            metrics: None,
        }
    }

    /// Raise `signal` on every push
    pub fn with_signal(mut self, signal: Arc<DataSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Count received and dropped samples into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<SessionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // `closed` only changes while this lock is held.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device this queue belongs to
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Maximum number of buffered samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a reading, stamping it with the next arrival sequence
    ///
    /// If the queue was full, the oldest sample is removed and returned.
    /// Pushing to a closed queue is ignored.
    pub fn push(&self, orientation: Quaternion) -> Option<OrientationSample> {
        let evicted = {
            let mut state = self.lock_state();
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state
                .buffer
                .push_back(OrientationSample::new(self.device.clone(), orientation, sequence));

            if state.buffer.len() > self.capacity {
                state.dropped += 1;
                if state.dropped == 1 {
                    warn!("{}: queue full, dropping oldest samples", self.device);
                }
                state.buffer.pop_front()
            } else {
                None
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_received();
            if evicted.is_some() {
                metrics.record_dropped();
            }
        }
        if let Some(signal) = &self.signal {
            signal.notify();
        }
        evicted
    }

    /// Remove and return the oldest sample, or `None` if empty
    pub fn try_pop(&self) -> Option<OrientationSample> {
        self.lock_state().buffer.pop_front()
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.lock_state().buffer.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock_state().buffer.is_empty()
    }

    /// Samples discarded on overflow so far
    pub fn dropped(&self) -> u64 {
        self.lock_state().dropped
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting samples and discard everything buffered
    ///
    /// Returns false if the queue was already closed.
    pub fn close(&self) -> bool {
        let discarded = {
            let mut state = self.lock_state();
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            let n = state.buffer.len();
            state.buffer.clear();
            n
        };
        debug!("{}: queue released ({} pending discarded)", self.device, discarded);
        true
    }
}

impl DeviceListener for SampleQueue {
    fn on_data_available(&self, device: &DeviceIdentity, orientation: Quaternion) {
        if device.serial() != self.device.serial() {
            debug!("{}: ignoring sample for {}", self.device, device);
            return;
        }
        self.push(orientation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn queue(capacity: usize) -> SampleQueue {
        SampleQueue::new(DeviceIdentity::child("00B4391F"), capacity)
    }

    fn q(w: f64) -> Quaternion {
        Quaternion::new(0.0, 0.0, 0.0, w)
    }

    #[test]
    fn test_queue_new() {
        let queue = queue(4);
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let queue = queue(4);
        queue.push(q(1.0));
        queue.push(q(2.0));
        queue.push(q(3.0));
        assert_eq!(queue.try_pop().unwrap().orientation.w, 1.0);
        assert_eq!(queue.try_pop().unwrap().orientation.w, 2.0);
        assert_eq!(queue.try_pop().unwrap().orientation.w, 3.0);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_sequence_numbers() {
        let queue = queue(4);
        queue.push(q(1.0));
        queue.push(q(1.0));
        assert_eq!(queue.try_pop().unwrap().sequence, 0);
        assert_eq!(queue.try_pop().unwrap().sequence, 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = queue(3);
        for i in 0..3 {
            assert!(queue.push(q(i as f64)).is_none());
        }
        let evicted = queue.push(q(3.0)).unwrap();
        assert_eq!(evicted.orientation.w, 0.0);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop().unwrap().orientation.w, 1.0);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let queue = queue(300);
        for i in 0..1000 {
            queue.push(q(i as f64));
            assert!(queue.len() <= 300);
        }
        assert_eq!(queue.dropped(), 700);
        assert_eq!(queue.try_pop().unwrap().sequence, 700);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue = queue(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(q(1.0));
        queue.push(q(2.0));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().orientation.w, 2.0);
    }

    #[test]
    fn test_close_discards_and_ignores() {
        let queue = queue(4);
        queue.push(q(1.0));
        assert!(queue.close());
        assert!(queue.is_empty());
        queue.push(q(2.0));
        assert!(queue.is_empty());
        assert!(!queue.close());
    }

    #[test]
    fn test_listener_filters_device() {
        let queue = queue(4);
        queue.on_data_available(&DeviceIdentity::child("00B43808"), q(1.0));
        assert!(queue.is_empty());
        queue.on_data_available(&DeviceIdentity::child("00b4391f"), q(1.0));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_metrics_and_signal() {
        let metrics = Arc::new(SessionMetrics::new());
        let signal = Arc::new(DataSignal::new());
        let queue = queue(1)
            .with_metrics(Arc::clone(&metrics))
            .with_signal(Arc::clone(&signal));
        queue.push(q(1.0));
        queue.push(q(2.0));
        let snap = metrics.snapshot();
        assert_eq!(snap.samples_received, 2);
        assert_eq!(snap.samples_dropped, 1);
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_signal_times_out() {
        let signal = DataSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(DataSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(10));
        signal.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let queue = Arc::new(queue(50));
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..10_000 {
                    queue.push(q(i as f64));
                }
            })
        };
        let mut last = None;
        let mut popped = 0u64;
        while !producer.is_finished() || !queue.is_empty() {
            if let Some(sample) = queue.try_pop() {
                if let Some(prev) = last {
                    assert!(sample.sequence > prev);
                }
                last = Some(sample.sequence);
                popped += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert_eq!(popped + queue.dropped(), 10_000);
    }

    #[test]
    fn test_no_push_lands_after_close() {
        for _ in 0..50 {
            let queue = Arc::new(queue(8));
            let producer = {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..2_000 {
                        queue.push(q(i as f64));
                    }
                })
            };
            std::thread::yield_now();
            queue.close();
            producer.join().unwrap();
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn test_close_recovers_poisoned_lock() {
        let queue = Arc::new(queue(4));
        queue.push(q(1.0));
        let holder = Arc::clone(&queue);
        let _ = std::thread::spawn(move || {
            let _state = holder.state.lock().unwrap();
            panic!("producer died holding the lock");
        })
        .join();
        assert!(queue.state.is_poisoned());

        assert!(queue.close());
        assert!(queue.is_empty());
        assert!(queue.push(q(2.0)).is_none());
        assert_eq!(queue.len(), 0);
    }
}
