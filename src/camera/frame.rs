// Single-slot buffer holding the latest encoded frame
//
// One writer (the capture loop), any number of readers. A frame is an
// immutable Arc'd byte slice, so readers only ever see whole frames and a
// slow reader simply skips the ones it missed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub data: Arc<[u8]>,
}

#[derive(Debug, Clone)]
pub struct FrameBuffer {
    slot: Arc<watch::Sender<Option<Frame>>>,
    next_seq: Arc<AtomicU64>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            next_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replace the current frame; returns its sequence number
    pub fn publish(&self, data: Vec<u8>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.slot.send_replace(Some(Frame {
            seq,
            data: data.into(),
        }));
        seq
    }

    /// Snapshot of the latest frame, if any was captured yet
    pub fn latest(&self) -> Option<Frame> {
        self.slot.borrow().clone()
    }

    /// Reader that yields the current frame first, then every newer one it
    /// manages to catch
    pub fn subscribe(&self) -> FrameSubscriber {
        let mut rx = self.slot.subscribe();
        rx.mark_changed();
        FrameSubscriber { rx }
    }
}

pub struct FrameSubscriber {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameSubscriber {
    /// Wait for a frame newer than the last one returned. `None` once the
    /// buffer is gone.
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}
