//! Frame FIFO with a dedicated worker thread
//!
//! A [`Fifo`] is a stream slave to its upstream and a stream master to its
//! downstream. `accept_frame` never blocks: it queues the frame (optionally
//! as a trimmed copy) or drops it when the queue is full. A single worker
//! thread dequeues frames in arrival order and delivers them downstream.

pub use crate::config::FifoConfig;
use crate::error::{DaqError, Result};
use crate::lock::lock;
use crate::stream::pool::Pool;
use crate::stream::{Frame, StreamMaster, StreamSlave};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct Queue {
    frames: VecDeque<Arc<Frame>>,
    paused: bool,
    stop: bool,
}

struct FifoShared {
    config: FifoConfig,
    pool: Option<Arc<Pool>>,
    queue: Mutex<Queue>,
    ready: Condvar,
    master: StreamMaster,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl FifoShared {
    fn drop_frame(&self, reason: &str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(target: "daqlink::fifo", "Dropping frame ({}), {} dropped so far", reason, total);
    }

    fn is_full(&self, queue: &Queue) -> bool {
        self.config.max_depth > 0 && queue.frames.len() >= self.config.max_depth
    }

    fn copy(&self, frame: &Frame) -> Result<Frame> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DaqError::Config("copying fifo has no pool".to_string()))?;
        let size = match self.config.trim_size {
            0 => frame.payload(),
            trim => frame.payload().min(trim),
        };
        let mut copy = pool.try_alloc(size, 0)?;
        copy.copy_payload_from(frame, size)?;
        copy.set_flags(frame.flags());
        copy.set_error(frame.error());
        copy.set_channel(frame.channel());
        Ok(copy)
    }

    fn run(&self) {
        loop {
            let frame = {
                let mut queue = lock(&self.queue);
                while !queue.stop && (queue.paused || queue.frames.is_empty()) {
                    queue = self
                        .ready
                        .wait(queue)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                if queue.stop {
                    break;
                }
                queue.frames.pop_front()
            };

            if let Some(frame) = frame {
                self.master.send_frame(frame);
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }

        let abandoned = lock(&self.queue).frames.len();
        tracing::debug!(target: "daqlink::fifo", "Worker stopped with {} queued frames", abandoned);
    }
}

pub struct Fifo {
    shared: Arc<FifoShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Fifo {
    /// Create a fifo and start its worker.
    ///
    /// A copying fifo (`no_copy == false`) needs a pool for its copies.
    pub fn new(config: FifoConfig, pool: Option<Arc<Pool>>) -> Result<Self> {
        if !config.no_copy && pool.is_none() {
            return Err(DaqError::Config(
                "a copying fifo requires a buffer pool".to_string(),
            ));
        }

        let shared = Arc::new(FifoShared {
            config,
            pool,
            queue: Mutex::new(Queue {
                frames: VecDeque::new(),
                paused: false,
                stop: false,
            }),
            ready: Condvar::new(),
            master: StreamMaster::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("daqlink-fifo".to_string())
            .spawn(move || worker_shared.run())?;

        tracing::debug!(
            target: "daqlink::fifo",
            "Fifo started: max_depth={} trim_size={} no_copy={}",
            config.max_depth,
            config.trim_size,
            config.no_copy
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> FifoConfig {
        self.shared.config
    }

    /// Attach a downstream slave
    pub fn add_slave(&self, slave: Arc<dyn StreamSlave>) {
        self.shared.master.add_slave(slave);
    }

    /// Frames currently queued
    pub fn depth(&self) -> usize {
        lock(&self.shared.queue).frames.len()
    }

    /// Frames dropped on overflow or copy failure
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Frames handed to the downstream slaves
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Hold the worker before its next dequeue; arrivals still queue
    pub fn pause(&self) {
        lock(&self.shared.queue).paused = true;
    }

    pub fn resume(&self) {
        lock(&self.shared.queue).paused = false;
        self.shared.ready.notify_all();
    }

    /// Stop and join the worker. Queued frames are discarded.
    pub fn stop(&self) {
        lock(&self.shared.queue).stop = true;
        self.shared.ready.notify_all();
        if let Some(handle) = lock(&self.worker).take() {
            if handle.join().is_err() {
                tracing::error!(target: "daqlink::fifo", "Fifo worker panicked");
            }
        }
    }
}

impl StreamSlave for Fifo {
    fn accept_frame(&self, frame: Arc<Frame>) {
        let shared = &self.shared;

        {
            let queue = lock(&shared.queue);
            if queue.stop {
                drop(queue);
                shared.drop_frame("stopped");
                return;
            }
            if shared.is_full(&queue) {
                drop(queue);
                shared.drop_frame("queue full");
                return;
            }
        }

        let frame = if shared.config.no_copy {
            frame
        } else {
            match shared.copy(&frame) {
                Ok(copy) => Arc::new(copy),
                Err(e) => {
                    shared.drop_frame(&e.to_string());
                    return;
                }
            }
        };

        let mut queue = lock(&shared.queue);
        if shared.is_full(&queue) {
            drop(queue);
            shared.drop_frame("queue full");
            return;
        }
        queue.frames.push_back(frame);
        drop(queue);
        shared.ready.notify_one();
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Fifo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fifo")
            .field("config", &self.shared.config)
            .field("depth", &self.depth())
            .field("dropped", &self.dropped())
            .field("delivered", &self.delivered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sink::ChannelSink;
    use crate::stream::Buffer;
    use std::time::Duration;

    fn frame_with(bytes: &[u8]) -> Arc<Frame> {
        let mut frame = Frame::from_buffers(vec![Buffer::detached(bytes.len().max(1))]);
        frame.write(0, bytes).unwrap();
        Arc::new(frame)
    }

    #[test]
    fn test_copy_mode_requires_pool() {
        assert!(Fifo::new(FifoConfig::new(0, 0, false), None).is_err());
    }

    #[test]
    fn test_no_copy_passes_same_frame() {
        let fifo = Fifo::new(FifoConfig::new(0, 0, true), None).unwrap();
        let (sink, rx) = ChannelSink::new(8);
        fifo.add_slave(Arc::new(sink));

        let frame = frame_with(&[1, 2, 3]);
        fifo.accept_frame(frame.clone());
        let out = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(Arc::ptr_eq(&out, &frame));
    }

    #[test]
    fn test_copy_trims_and_keeps_metadata() {
        let pool = Pool::unbounded(4);
        let fifo = Fifo::new(FifoConfig::new(0, 6, false), Some(pool.clone())).unwrap();
        let (sink, rx) = ChannelSink::new(8);
        fifo.add_slave(Arc::new(sink));

        let mut frame = Frame::from_buffers(vec![Buffer::detached(16)]);
        frame.write(0, &[9, 8, 7, 6, 5, 4, 3, 2, 1]).unwrap();
        frame.set_channel(3);
        frame.set_flags(0x0201);
        fifo.accept_frame(Arc::new(frame));

        let out = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(out.to_vec(), vec![9, 8, 7, 6, 5, 4]);
        assert_eq!(out.channel(), 3);
        assert_eq!(out.first_user(), 1);
        assert_eq!(out.last_user(), 2);
        assert_eq!(out.buffer_count(), 2);
    }

    #[test]
    fn test_stop_discards_and_drops_new_arrivals() {
        let fifo = Fifo::new(FifoConfig::new(0, 0, true), None).unwrap();
        fifo.pause();
        fifo.accept_frame(frame_with(&[1]));
        fifo.stop();
        fifo.accept_frame(frame_with(&[2]));
        assert_eq!(fifo.delivered(), 0);
        assert_eq!(fifo.dropped(), 1);
    }
}
