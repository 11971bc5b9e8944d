//! Batcher super-frame decoder, version 1
//!
//! Super-frame layout, with W the interface width in bytes:
//!
//! ```text
//! header (W bytes)
//!   byte 0: bits 3:0 = version (1), bits 7:4 = log2(W / 2)
//!   byte 1: sequence number
//!   rest:   zero
//! record payload, zero-padded to a multiple of W
//! record tail (max(W, 8) bytes, little endian)
//!   bytes 0..3: record size
//!   byte 4:     destination
//!   byte 5:     first user
//!   byte 6:     last user
//!   byte 7:     valid bytes in the last word
//! ... more payload + tail pairs ...
//! ```
//!
//! Tails are found by walking backward from the end of the frame. Records
//! never copy payload; each one points into the shared super-frame.

use crate::error::{DaqError, Result};
use crate::stream::{Frame, FrameIterator};
use std::sync::Arc;

/// Only accepted header version
pub const VERSION: u8 = 1;

/// Minimum tail size in bytes
pub const MIN_TAIL_SIZE: usize = 8;

/// One sub-record carved out of a super-frame
#[derive(Clone)]
pub struct Record {
    frame: Arc<Frame>,
    offset: usize,
    size: usize,
    dest: u8,
    first_user: u8,
    last_user: u8,
}

impl Record {
    /// Payload size in bytes (without padding)
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn dest(&self) -> u8 {
        self.dest
    }

    #[inline]
    pub fn first_user(&self) -> u8 {
        self.first_user
    }

    #[inline]
    pub fn last_user(&self) -> u8 {
        self.last_user
    }

    /// Offset of the record payload within the super-frame payload
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    /// Iterator at the first payload byte; the record ends `size()` bytes later
    pub fn iter(&self) -> FrameIterator<'_> {
        self.frame.begin_payload() + self.offset
    }

    /// Copy the record payload into `dst`, replacing its payload
    pub fn write_into(&self, dst: &mut Frame) -> Result<()> {
        dst.set_payload(self.size)?;
        let mut it = self.iter();
        let mut written = 0;
        while written < self.size {
            let Some(chunk) = it.next_chunk(self.size - written) else {
                break;
            };
            dst.write(written, chunk)?;
            written += chunk.len();
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().take(self.size).collect()
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("dest", &self.dest)
            .field("first_user", &self.first_user)
            .field("last_user", &self.last_user)
            .finish()
    }
}

/// Decoder state for the last processed super-frame
#[derive(Debug, Default)]
pub struct CoreV1 {
    frame: Option<Arc<Frame>>,
    header_size: usize,
    tail_size: usize,
    sequence: u8,
    records: Vec<Record>,
    tails: Vec<usize>,
}

impl CoreV1 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all state from the previous frame
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Decode a super-frame, logging and returning `false` on rejection
    pub fn process_frame(&mut self, frame: Arc<Frame>) -> bool {
        match self.try_process(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target: "daqlink::batcher", "Dropping super-frame: {}", e);
                false
            }
        }
    }

    /// Decode a super-frame.
    ///
    /// On failure no partial state is kept.
    pub fn try_process(&mut self, frame: Arc<Frame>) -> Result<()> {
        self.reset();
        let result = self.parse(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn parse(&mut self, frame: Arc<Frame>) -> Result<()> {
        if frame.error() != 0 {
            return Err(DaqError::Protocol(format!(
                "frame carries error 0x{:x}",
                frame.error()
            )));
        }

        let payload = frame.payload();
        if payload < 2 {
            return Err(DaqError::Protocol(format!("frame too small ({} bytes)", payload)));
        }

        let mut header = [0u8; 2];
        frame.begin_payload().read_into(&mut header)?;

        let version = header[0] & 0x0F;
        if version != VERSION {
            return Err(DaqError::Protocol(format!("version mismatch, got {}", version)));
        }

        let header_size = 1usize << (((header[0] >> 4) & 0x0F) + 1);
        let tail_size = header_size.max(MIN_TAIL_SIZE);
        if payload < header_size + tail_size {
            return Err(DaqError::Protocol(format!(
                "not enough space ({}) for header ({}) and tail ({})",
                payload, header_size, tail_size
            )));
        }

        let mut records = Vec::new();
        let mut tails = Vec::new();
        {
            let mut mark = frame.end_payload();
            let mut remaining = payload - header_size;

            while remaining > 0 {
                if remaining < tail_size {
                    return Err(DaqError::Truncated(format!(
                        "not enough space ({}) for tail ({})",
                        remaining, tail_size
                    )));
                }
                mark.retreat(tail_size)?;
                remaining -= tail_size;
                tails.push(mark.position());

                let mut tail = [0u8; MIN_TAIL_SIZE];
                let mut cursor = mark;
                cursor.read_into(&mut tail)?;
                let size = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;

                let jump = size.div_ceil(header_size) * header_size;
                if jump > remaining {
                    return Err(DaqError::Truncated(format!(
                        "not enough space ({}) for record ({})",
                        remaining, jump
                    )));
                }
                mark.retreat(jump)?;
                remaining -= jump;

                records.push(Record {
                    frame: frame.clone(),
                    offset: mark.position(),
                    size,
                    dest: tail[4],
                    first_user: tail[5],
                    last_user: tail[6],
                });
            }
        }

        records.reverse();
        tails.reverse();

        self.header_size = header_size;
        self.tail_size = tail_size;
        self.sequence = header[1];
        self.records = records;
        self.tails = tails;
        self.frame = Some(frame);
        Ok(())
    }

    /// Number of records in the last decoded super-frame
    #[inline]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline]
    pub fn tail_size(&self) -> usize {
        self.tail_size
    }

    #[inline]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn frame(&self) -> Option<&Arc<Frame>> {
        self.frame.as_ref()
    }

    /// Iterator at the super-frame header
    pub fn header(&self) -> Option<FrameIterator<'_>> {
        self.frame.as_ref().map(|f| f.begin_payload())
    }

    /// Records in wire order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Result<&Record> {
        self.records.get(index).ok_or_else(|| {
            DaqError::boundary("CoreV1::record", index as u64, self.records.len() as u64)
        })
    }

    /// Iterator at the tail of record `index`
    pub fn tail(&self, index: usize) -> Result<FrameIterator<'_>> {
        match (self.frame.as_ref(), self.tails.get(index)) {
            (Some(frame), Some(&offset)) => Ok(frame.begin_payload() + offset),
            _ => Err(DaqError::boundary(
                "CoreV1::tail",
                index as u64,
                self.tails.len() as u64,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::stream::Buffer;

    fn frame_of(bytes: &[u8]) -> Arc<Frame> {
        let mut frame = Frame::from_buffers(vec![Buffer::detached(bytes.len().max(1))]);
        frame.write(0, bytes).unwrap();
        Arc::new(frame)
    }

    fn header(width_code: u8, seq: u8, width: usize) -> Vec<u8> {
        let mut h = vec![0u8; width];
        h[0] = (width_code << 4) | 1;
        h[1] = seq;
        h
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut bytes = header(2, 0, 8);
        bytes[0] = 0x32;
        bytes.extend_from_slice(&[0u8; 8]);
        let mut core = CoreV1::new();
        let err = core.try_process(frame_of(&bytes)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Protocol);
        assert_eq!(core.count(), 0);
    }

    #[test]
    fn test_rejects_errored_and_small_frames() {
        let mut core = CoreV1::new();
        let mut frame = Frame::from_buffers(vec![Buffer::detached(32)]);
        frame.set_payload(32).unwrap();
        frame.set_error(1);
        assert!(!core.process_frame(Arc::new(frame)));

        let err = core.try_process(frame_of(&header(2, 0, 8))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Protocol);
    }

    #[test]
    fn test_truncated_record_discards_state() {
        let mut bytes = header(2, 5, 8);
        bytes.extend_from_slice(&[0xAA; 8]);
        // tail claims 64 bytes of payload
        bytes.extend_from_slice(&[64, 0, 0, 0, 1, 0, 0, 8]);
        let mut core = CoreV1::new();
        let err = core.try_process(frame_of(&bytes)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Truncated);
        assert_eq!(core.count(), 0);
        assert_eq!(core.sequence(), 0);
        assert!(core.frame().is_none());
    }

    #[test]
    fn test_width_two_uses_eight_byte_tail() {
        let mut bytes = header(0, 9, 2);
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        bytes.extend_from_slice(&[3, 0, 0, 0, 4, 5, 6, 1]);
        let mut core = CoreV1::new();
        core.try_process(frame_of(&bytes)).unwrap();
        assert_eq!(core.header_size(), 2);
        assert_eq!(core.tail_size(), 8);
        assert_eq!(core.sequence(), 9);
        let rec = core.record(0).unwrap();
        assert_eq!(rec.to_vec(), vec![1, 2, 3]);
        assert_eq!((rec.dest(), rec.first_user(), rec.last_user()), (4, 5, 6));
        assert_eq!(core.tail(0).unwrap().position(), 6);
        assert!(core.record(1).is_err());
        assert!(core.tail(1).is_err());
    }

    #[test]
    fn test_zero_size_record() {
        let mut core = CoreV1::new();
        // a tail-sized run of zeros decodes as one empty record
        let mut bytes = header(2, 1, 8);
        bytes.extend_from_slice(&[0u8; 8]);
        core.try_process(frame_of(&bytes)).unwrap();
        assert_eq!(core.count(), 1);
        assert_eq!(core.record(0).unwrap().size(), 0);
        assert_eq!(core.header().unwrap().get(), Some(0x21));
    }
}
