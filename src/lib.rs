//! # daqlink: data-acquisition transport core
//!
//! Moves register accesses and bulk sample data between host software and
//! FPGA/SoC hardware. Two pipelines share the crate:
//!
//! ## Memory pipeline
//!
//! A [`Master`](memory::Master) issues read/write transactions that flow
//! through a chain of [`Hub`](memory::Hub)s, each adding its address offset,
//! into a terminal such as [`MapMemory`](memory::MapMemory) (mmap'ed device)
//! or [`Emulate`](memory::Emulate) (sparse in-process memory). Every
//! transaction carries a deadline; a background reaper expires overdue ones.
//!
//! ## Stream pipeline
//!
//! [`Frame`](stream::Frame)s made of pooled [`Buffer`](stream::Buffer)s flow
//! from stream masters to stream slaves. [`Fifo`](stream::Fifo) decouples
//! producers from consumers, and the batcher
//! ([`CoreV1`](protocols::batcher::CoreV1)) splits firmware super-frames into
//! per-channel records.
//!
//! ## Configuration
//!
//! Settings load from `config.toml` in the platform configuration directory
//! under `daqlink`:
//!
//! - **Linux**: `~/.config/daqlink/config.toml`
//! - **macOS**: `~/Library/Application Support/daqlink/config.toml`
//! - **Windows**: `%APPDATA%\daqlink\config.toml`
//!
//! ## Example
//!
//! ```
//! use daqlink::memory::{Emulate, Hub, Master};
//! use std::sync::Arc;
//!
//! let hub = Arc::new(Hub::new(0x1000));
//! hub.set_slave(Arc::new(Emulate::new(4, 0x1000)));
//!
//! let master = Master::new("host");
//! master.set_slave(hub);
//! master.write(0x40, &[1, 2, 3, 4]).unwrap();
//! assert_eq!(master.read(0x40, 4).unwrap(), vec![1, 2, 3, 4]);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod protocols;
pub mod stream;

mod lock;

// Re-export commonly used types
pub use config::DaqConfig;
pub use error::{DaqError, ErrorCode, Result};
pub use memory::{Hub, Master, MemorySlave, Transaction, TransactionKind};
pub use stream::{Fifo, Frame, Pool, StreamMaster, StreamSlave};
