//! Stream slave that hands frames to a channel receiver

use crate::stream::{Frame, StreamSlave};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Forwards accepted frames over a crossbeam channel.
///
/// Never blocks: when the channel is full or disconnected the frame is
/// dropped and counted. Frames with a non-zero error are dropped too unless
/// the sink was built with [`accept_errored`](Self::accept_errored).
pub struct ChannelSink {
    tx: Sender<Arc<Frame>>,
    accept_errored: bool,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Sink with a channel of `capacity` frames (0 = unbounded)
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<Frame>>) {
        let (tx, rx) = if capacity == 0 {
            unbounded()
        } else {
            bounded(capacity)
        };
        (
            Self {
                tx,
                accept_errored: false,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Also forward frames carrying a non-zero error
    pub fn accept_errored(mut self) -> Self {
        self.accept_errored = true;
        self
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StreamSlave for ChannelSink {
    fn accept_frame(&self, frame: Arc<Frame>) {
        if frame.error() != 0 && !self.accept_errored {
            tracing::debug!(target: "daqlink::stream", "Dropping errored frame: 0x{:x}", frame.error());
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
