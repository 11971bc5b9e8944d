//! Streaming data pipeline
//!
//! Frames flow from a [`StreamMaster`] to every attached [`StreamSlave`]:
//!
//! ```text
//! source -> StreamMaster -> Fifo -> CoreV1 / SplitterV1 -> StreamSlave
//! ```
//!
//! A [`Frame`] is filled by its producer, wrapped in an `Arc` and sent. From
//! then on it is shared read-only; its buffers go back to their [`Pool`] when
//! the last reference drops.

pub mod buffer;
pub mod fifo;
pub mod frame;
pub mod iterator;
pub mod pool;
pub mod sink;

pub use buffer::Buffer;
pub use fifo::{Fifo, FifoConfig};
pub use frame::Frame;
pub use iterator::{FrameIterator, IterMode};
pub use pool::{ExhaustPolicy, Pool, PoolCounters, PoolRegistry};
pub use sink::ChannelSink;

use crate::lock::{read, write};
use std::sync::{Arc, RwLock};

/// Receiving side of a stream connection
#[cfg_attr(test, mockall::automock)]
pub trait StreamSlave: Send + Sync {
    /// Take a frame. Must not block the caller for long.
    fn accept_frame(&self, frame: Arc<Frame>);
}

/// Sending side of a stream connection; fans each frame out to every slave
#[derive(Default)]
pub struct StreamMaster {
    slaves: RwLock<Vec<Arc<dyn StreamSlave>>>,
}

impl StreamMaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_slave(&self, slave: Arc<dyn StreamSlave>) {
        write(&self.slaves).push(slave);
    }

    pub fn slave_count(&self) -> usize {
        read(&self.slaves).len()
    }

    /// Deliver `frame` to each slave in attachment order
    pub fn send_frame(&self, frame: Arc<Frame>) {
        let slaves = read(&self.slaves).clone();
        for slave in slaves {
            slave.accept_frame(frame.clone());
        }
    }
}

impl std::fmt::Debug for StreamMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMaster")
            .field("slaves", &self.slave_count())
            .finish()
    }
}
