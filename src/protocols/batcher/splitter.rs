//! Stream node that splits super-frames into one frame per record

use super::core_v1::CoreV1;
use crate::error::Result;
use crate::lock::lock;
use crate::stream::{Frame, Pool, StreamMaster, StreamSlave};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Decodes each incoming super-frame and emits every record as its own
/// frame, with `channel` set to the record destination and the first/last
/// user bytes carried in the flags. Errored or malformed super-frames are
/// dropped with a warning.
pub struct SplitterV1 {
    core: Mutex<CoreV1>,
    pool: Arc<Pool>,
    master: StreamMaster,
    rejected: AtomicU64,
    emitted: AtomicU64,
}

impl SplitterV1 {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            core: Mutex::new(CoreV1::new()),
            pool,
            master: StreamMaster::new(),
            rejected: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    pub fn add_slave(&self, slave: Arc<dyn StreamSlave>) {
        self.master.add_slave(slave);
    }

    /// Super-frames dropped by the decoder
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Record frames sent downstream
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    fn split(&self, frame: Arc<Frame>) -> Result<Vec<Frame>> {
        let mut core = lock(&self.core);
        core.try_process(frame)?;

        let mut out = Vec::with_capacity(core.count());
        for record in core.records() {
            let mut sub = self.pool.try_alloc(record.size(), 0)?;
            record.write_into(&mut sub)?;
            sub.set_channel(record.dest());
            sub.set_first_user(record.first_user());
            sub.set_last_user(record.last_user());
            out.push(sub);
        }
        // Release the super-frame before the records go downstream
        core.reset();
        Ok(out)
    }
}

impl StreamSlave for SplitterV1 {
    fn accept_frame(&self, frame: Arc<Frame>) {
        match self.split(frame) {
            Ok(frames) => {
                for sub in frames {
                    self.master.send_frame(Arc::new(sub));
                    self.emitted.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "daqlink::batcher", "Dropping super-frame: {}", e);
            }
        }
    }
}
