//! Frame hand-off between producers and the display loop.
//!
//! # Design
//!
//! - [`FrameQueue`] is a bounded lock-free `ArrayQueue`. Producers call
//!   [`FrameQueue::try_put`], which never blocks: on a full queue the frame is
//!   handed back and counted as dropped. The single consumer waits on a condvar
//!   for at most the given timeout.
//! - [`ReloadSignal`] is a shared flag a config writer raises after persisting a
//!   new configuration; the display loop clears it after each reload attempt.
//! - [`ProducerHandle`] is an optional "active producer" token. Claiming a new
//!   handle supersedes the previous one, whose frames are then rejected, so two
//!   generators left running at once cannot interleave frames.

use crate::frame::VirtualFrame;
use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default number of frames buffered ahead of the display loop.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Why a frame was not queued. The frame is handed back in every case.
#[derive(Debug)]
pub enum PutError {
    /// Queue at capacity.
    Full(VirtualFrame),
    /// Another producer has claimed the queue since this handle was issued.
    Superseded(VirtualFrame),
}

impl PutError {
    /// Recover the rejected frame.
    pub fn into_frame(self) -> VirtualFrame {
        match self {
            PutError::Full(frame) | PutError::Superseded(frame) => frame,
        }
    }
}

/// Bounded multi-producer, single-consumer frame queue.
#[derive(Debug)]
pub struct FrameQueue {
    slots: ArrayQueue<VirtualFrame>,
    lock: Mutex<()>,
    available: Condvar,
    dropped: AtomicU64,
    accepted: AtomicU64,
    active_producer: AtomicU64,
    active_label: Mutex<Option<String>>,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: ArrayQueue::new(capacity.max(1)),
            lock: Mutex::new(()),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            active_producer: AtomicU64::new(0),
            active_label: Mutex::new(None),
        }
    }

    /// Queue a frame without blocking. A full queue hands the frame back.
    pub fn try_put(&self, frame: VirtualFrame) -> Result<(), VirtualFrame> {
        match self.slots.push(frame) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                // Taking the lock orders this push before a waiter's re-check.
                drop(self.lock.lock());
                self.available.notify_one();
                Ok(())
            }
            Err(frame) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(frame)
            }
        }
    }

    /// Take the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<VirtualFrame> {
        if let Some(frame) = self.slots.pop() {
            return Some(frame);
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            if let Some(frame) = self.slots.pop() {
                return Some(frame);
            }
            if self.available.wait_until(&mut guard, deadline).timed_out() {
                return self.slots.pop();
            }
        }
    }

    /// Take the oldest frame if one is ready.
    pub fn try_pop(&self) -> Option<VirtualFrame> {
        self.slots.pop()
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Discard every queued frame, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        while self.slots.pop().is_some() {
            removed += 1;
        }
        info!(removed, "Frame queue cleared");
        removed
    }

    /// Frames rejected because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames accepted since creation.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Make a new handle the only producer allowed to queue tagged frames.
    pub fn claim_producer(self: &Arc<Self>, label: impl Into<String>) -> ProducerHandle {
        let label = label.into();
        // token and label change together so active_producer() names the winning handle
        let mut active = self.active_label.lock();
        let token = self.active_producer.fetch_add(1, Ordering::AcqRel) + 1;
        let previous = active.replace(label.clone());
        drop(active);
        info!(producer = %label, previous = ?previous, "Active frame producer claimed");
        ProducerHandle {
            queue: Arc::clone(self),
            token,
            label,
        }
    }

    /// Label of the current active producer, if any handle was ever claimed.
    pub fn active_producer(&self) -> Option<String> {
        self.active_label.lock().clone()
    }
}

/// Producer token returned by [`FrameQueue::claim_producer`].
#[derive(Debug)]
pub struct ProducerHandle {
    queue: Arc<FrameQueue>,
    token: u64,
    label: String,
}

impl ProducerHandle {
    /// Whether this handle is still the active producer.
    pub fn is_active(&self) -> bool {
        self.queue.active_producer.load(Ordering::Acquire) == self.token
    }

    /// Name given at claim time.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a frame if this handle is still active and the queue has room.
    pub fn try_put(&self, frame: VirtualFrame) -> Result<(), PutError> {
        if !self.is_active() {
            debug!(producer = %self.label, "Frame from superseded producer rejected");
            return Err(PutError::Superseded(frame));
        }
        self.queue.try_put(frame).map_err(PutError::Full)
    }
}

/// Shared "configuration changed" flag.
#[derive(Debug, Clone, Default)]
pub struct ReloadSignal(Arc<AtomicBool>);

impl ReloadSignal {
    /// New, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the display loop to reload the configuration.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a reload is pending.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the pending reload as handled.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(tag: u8) -> VirtualFrame {
        VirtualFrame::filled(1, 1, [tag, 0, 0])
    }

    fn tag(frame: &VirtualFrame) -> u8 {
        frame.as_bytes()[0]
    }

    #[test]
    fn fifo_order_and_drop_on_full() {
        let queue = FrameQueue::new(2);
        assert!(queue.try_put(frame(1)).is_ok());
        assert!(queue.try_put(frame(2)).is_ok());
        let rejected = queue.try_put(frame(3)).unwrap_err();
        assert_eq!(tag(&rejected), 3);
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.len(), 2);

        assert_eq!(tag(&queue.try_pop().unwrap()), 1);
        assert_eq!(tag(&queue.try_pop().unwrap()), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue = FrameQueue::new(4);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pop_timeout_wakes_on_put() {
        let queue = Arc::new(FrameQueue::new(4));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_put(frame(9)).unwrap();
        });
        let got = queue.pop_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(got.map(|f| tag(&f)), Some(9));
    }

    #[test]
    fn clear_empties_queue() {
        let queue = FrameQueue::new(4);
        for i in 0..3 {
            queue.try_put(frame(i)).unwrap();
        }
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.accepted_count(), 3);
    }

    #[test]
    fn newer_producer_supersedes_older() {
        let queue = Arc::new(FrameQueue::new(4));
        let pattern = queue.claim_producer("pattern");
        assert!(pattern.try_put(frame(1)).is_ok());

        let game = queue.claim_producer("game");
        assert!(!pattern.is_active());
        assert!(game.is_active());
        assert!(matches!(
            pattern.try_put(frame(2)),
            Err(PutError::Superseded(_))
        ));
        assert!(game.try_put(frame(3)).is_ok());
        assert_eq!(queue.active_producer().as_deref(), Some("game"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn concurrent_claims_leave_label_matching_active_handle() {
        for _ in 0..50 {
            let queue = Arc::new(FrameQueue::new(4));
            let claimers: Vec<_> = (0..8)
                .map(|i| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || queue.claim_producer(format!("producer-{i}")))
                })
                .collect();
            let handles: Vec<ProducerHandle> =
                claimers.into_iter().map(|t| t.join().unwrap()).collect();

            let active: Vec<&ProducerHandle> = handles.iter().filter(|h| h.is_active()).collect();
            assert_eq!(active.len(), 1);
            assert_eq!(queue.active_producer().as_deref(), Some(active[0].label()));
        }
    }

    #[test]
    fn reload_signal_is_shared() {
        let writer = ReloadSignal::new();
        let reader = writer.clone();
        assert!(!reader.is_requested());
        writer.request();
        assert!(reader.is_requested());
        reader.clear();
        assert!(!writer.is_requested());
    }
}
