//! Batcher super-frame encoder
//!
//! Builds super-frames in the layout decoded by
//! [`CoreV1`](super::CoreV1). Used for loopback, simulation and tests.

use super::core_v1::{MIN_TAIL_SIZE, VERSION};
use crate::error::{DaqError, Result};
use crate::stream::{Frame, Pool};
use std::sync::Arc;

/// Largest supported interface width (header nibble 15)
pub const MAX_WIDTH: usize = 1 << 16;

#[derive(Debug, Clone)]
struct PendingRecord {
    dest: u8,
    first_user: u8,
    last_user: u8,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SuperFrameBuilder {
    width: usize,
    sequence: u8,
    records: Vec<PendingRecord>,
}

impl SuperFrameBuilder {
    /// Builder for interface width `width`, a power of two from 2 to 65536 bytes
    pub fn new(width: usize) -> Result<Self> {
        if !width.is_power_of_two() || !(2..=MAX_WIDTH).contains(&width) {
            return Err(DaqError::Protocol(format!(
                "unsupported batcher width {}",
                width
            )));
        }
        Ok(Self {
            width,
            sequence: 0,
            records: Vec::new(),
        })
    }

    pub fn sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    /// Append one record
    pub fn push(&mut self, dest: u8, first_user: u8, last_user: u8, data: &[u8]) -> &mut Self {
        self.records.push(PendingRecord {
            dest,
            first_user,
            last_user,
            data: data.to_vec(),
        });
        self
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn tail_size(&self) -> usize {
        self.width.max(MIN_TAIL_SIZE)
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.width
            + self
                .records
                .iter()
                .map(|r| r.data.len().div_ceil(self.width) * self.width + self.tail_size())
                .sum::<usize>()
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let width = self.width;
        let mut out = Vec::with_capacity(self.encoded_len());

        // log2(W / 2) fits the high nibble for every accepted width
        let code = (width.trailing_zeros() - 1) as u8;
        out.push((code << 4) | VERSION);
        out.push(self.sequence);
        out.resize(width, 0);

        for record in &self.records {
            let size = record.data.len();
            out.extend_from_slice(&record.data);
            out.resize(out.len() + (size.div_ceil(width) * width - size), 0);

            // Valid-bytes field is one byte wide; widths above 255 wrap
            let valid = match size % width {
                0 if size == 0 => 0,
                0 => width,
                rem => rem,
            };

            let tail_start = out.len();
            out.extend_from_slice(&(size as u32).to_le_bytes());
            out.push(record.dest);
            out.push(record.first_user);
            out.push(record.last_user);
            out.push(valid as u8);
            out.resize(tail_start + self.tail_size(), 0);
        }
        out
    }

    /// Encode into a frame allocated from `pool`
    pub fn build(&self, pool: &Arc<Pool>) -> Result<Frame> {
        let bytes = self.encode_to_vec();
        let mut frame = pool.alloc(bytes.len(), 0)?;
        frame.write(0, &bytes)?;
        Ok(frame)
    }
}
