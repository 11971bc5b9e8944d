//! Batcher protocol
//!
//! Firmware packs many small records into one transport frame (a
//! super-frame), each followed by a tail describing it. [`CoreV1`] decodes a
//! super-frame in place, [`SuperFrameBuilder`] produces one and
//! [`SplitterV1`] turns each record into its own stream frame.

pub mod core_v1;
pub mod encoder;
pub mod splitter;

pub use core_v1::{CoreV1, Record};
pub use encoder::SuperFrameBuilder;
pub use splitter::SplitterV1;
