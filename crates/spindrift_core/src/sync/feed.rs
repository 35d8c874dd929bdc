//! Bounded digest channel plus a delivery gate.
//!
//! Publishing never blocks the tick thread. When the reader is a full buffer
//! behind, the new digest is dropped and counted; tick numbers let the reader
//! see the gap. [`ChangeFeed::sync`] is the only blocking call.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::{Condvar, Mutex};

use super::TickDigest;
use crate::error::{SpindriftError, SpindriftResult};

#[derive(Debug, Default)]
struct GateState {
    /// Latest tick actually queued for the reader.
    published: u64,
    delivered: u64,
    dropped: u64,
    reader_attached: bool,
}

/// Tracks which tick the reader has received.
#[derive(Debug, Default)]
struct DeliveryGate {
    state: Mutex<GateState>,
    delivered: Condvar,
}

impl DeliveryGate {
    fn caught_up(state: &GateState) -> bool {
        !state.reader_attached || state.delivered >= state.published
    }
}

/// Producer half, owned by the controller.
#[derive(Debug)]
pub struct ChangeFeed {
    sender: Sender<TickDigest>,
    gate: Arc<DeliveryGate>,
}

/// Consumer half, handed to the host.
#[derive(Debug)]
pub struct FeedReader {
    receiver: Receiver<TickDigest>,
    gate: Arc<DeliveryGate>,
}

impl ChangeFeed {
    /// Creates a connected feed buffering up to `capacity` digests.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, FeedReader) {
        let (sender, receiver) = bounded(capacity.max(1));
        let gate = Arc::new(DeliveryGate {
            state: Mutex::new(GateState {
                reader_attached: true,
                ..GateState::default()
            }),
            delivered: Condvar::new(),
        });
        (
            Self {
                sender,
                gate: Arc::clone(&gate),
            },
            FeedReader { receiver, gate },
        )
    }

    /// Returns true while the reader exists.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.gate.state.lock().reader_attached
    }

    /// Digests dropped so far because the reader lagged.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.gate.state.lock().dropped
    }

    /// Queues a digest without blocking.
    ///
    /// Returns false if the buffer was full and the digest was dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::FeedDisconnected`] if the reader was dropped.
    pub fn publish(&self, digest: TickDigest) -> SpindriftResult<bool> {
        let mut state = self.gate.state.lock();
        if !state.reader_attached {
            return Err(SpindriftError::FeedDisconnected);
        }
        let tick = digest.tick;
        match self.sender.try_send(digest) {
            Ok(()) => {
                state.published = state.published.max(tick);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                state.dropped += 1;
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(SpindriftError::FeedDisconnected),
        }
    }

    /// Blocks until the reader has received the latest published digest.
    ///
    /// Returns at once if nothing is outstanding or the reader is gone.
    pub fn sync(&self) {
        let mut state = self.gate.state.lock();
        while !DeliveryGate::caught_up(&state) {
            self.gate.delivered.wait(&mut state);
        }
    }

    /// Like [`ChangeFeed::sync`], giving up after `timeout`.
    ///
    /// Returns true if the reader caught up.
    pub fn sync_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.gate.state.lock();
        if DeliveryGate::caught_up(&state) {
            return true;
        }
        self.gate.delivered.wait_for(&mut state, timeout);
        DeliveryGate::caught_up(&state)
    }
}

impl FeedReader {
    /// Receives the next digest, blocking until one is published.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::FeedDisconnected`] once the controller has
    /// dropped its feed and every buffered digest was received.
    pub fn recv(&self) -> SpindriftResult<TickDigest> {
        let digest = self
            .receiver
            .recv()
            .map_err(|_| SpindriftError::FeedDisconnected)?;
        self.mark_delivered(digest.tick);
        Ok(digest)
    }

    /// Receives a digest if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`SpindriftError::FeedDisconnected`] if the controller dropped
    /// its feed and the buffer is empty.
    pub fn try_recv(&self) -> SpindriftResult<Option<TickDigest>> {
        match self.receiver.try_recv() {
            Ok(digest) => {
                self.mark_delivered(digest.tick);
                Ok(Some(digest))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SpindriftError::FeedDisconnected),
        }
    }

    /// Receives a digest, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TickDigest> {
        let digest = self.receiver.recv_timeout(timeout).ok()?;
        self.mark_delivered(digest.tick);
        Some(digest)
    }

    fn mark_delivered(&self, tick: u64) {
        let mut state = self.gate.state.lock();
        state.delivered = tick;
        self.gate.delivered.notify_all();
    }
}

impl Drop for FeedReader {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.reader_attached = false;
        self.gate.delivered.notify_all();
    }
}
