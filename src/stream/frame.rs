//! Stream frame - an ordered list of buffers carrying one payload
//!
//! A frame is built and filled by its producer through `&mut Frame`, then
//! handed downstream as an `Arc<Frame>`. Once sent it is read-only.
//!
//! # Size accounting
//!
//! Every quantity is the sum over the buffer list:
//!
//! - `size` - raw bytes of every region
//! - `capacity` - `size` minus head and tail reservations
//! - `payload` - filled bytes
//! - `available` - `capacity - payload`
//!
//! so `payload + available + head_reserved + tail_reserved == size` always
//! holds.
//!
//! # Iterators
//!
//! [`FrameIterator`]s borrow the frame, so anything that changes the buffer
//! list or payload sizes cannot run while an iterator is alive:
//!
//! ```compile_fail
//! use daqlink::stream::{Buffer, Frame};
//!
//! let mut frame = Frame::new();
//! frame.append_buffer(Buffer::detached(16));
//! let it = frame.begin();
//! frame.set_payload(8).unwrap();
//! assert_eq!(it.position(), 0);
//! ```

use crate::error::{DaqError, Result};
use crate::stream::buffer::Buffer;
use crate::stream::iterator::{FrameIterator, IterMode};

/// Mask of the first-user byte within `flags`
const FIRST_USER_MASK: u32 = 0x0000_00FF;
/// Mask of the last-user byte within `flags`
const LAST_USER_MASK: u32 = 0x0000_FF00;

#[derive(Debug, Default)]
pub struct Frame {
    buffers: Vec<Buffer>,
    flags: u32,
    error: u32,
    channel: u8,
}

impl Frame {
    /// Empty frame with no buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame over the given buffers, in order
    pub fn from_buffers(buffers: Vec<Buffer>) -> Self {
        Self {
            buffers,
            ..Default::default()
        }
    }

    /// Append a buffer to the end of the frame
    pub fn append_buffer(&mut self, buffer: Buffer) {
        self.buffers.push(buffer);
    }

    /// Move every buffer of `other` to the end of this frame
    pub fn append_frame(&mut self, mut other: Frame) {
        self.buffers.append(&mut other.buffers);
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the frame has no buffers
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn size(&self) -> usize {
        self.buffers.iter().map(Buffer::size).sum()
    }

    pub fn capacity(&self) -> usize {
        self.buffers.iter().map(Buffer::capacity).sum()
    }

    pub fn payload(&self) -> usize {
        self.buffers.iter().map(Buffer::payload).sum()
    }

    pub fn available(&self) -> usize {
        self.buffers.iter().map(Buffer::available).sum()
    }

    pub fn head_reserved(&self) -> usize {
        self.buffers.iter().map(Buffer::head_reserved).sum()
    }

    pub fn tail_reserved(&self) -> usize {
        self.buffers.iter().map(Buffer::tail_reserved).sum()
    }

    /// Set the payload to exactly `size` bytes, filling buffers in order.
    ///
    /// Fails without touching any buffer if `size` exceeds the capacity.
    pub fn set_payload(&mut self, size: usize) -> Result<()> {
        let capacity = self.capacity();
        if size > capacity {
            return Err(DaqError::boundary(
                "Frame::set_payload",
                size as u64,
                capacity as u64,
            ));
        }

        let mut remaining = size;
        for buffer in &mut self.buffers {
            let take = remaining.min(buffer.capacity());
            buffer.set_payload(take)?;
            remaining -= take;
        }
        Ok(())
    }

    /// Raise the payload to at least `size` bytes; never lowers it
    pub fn min_payload(&mut self, size: usize) -> Result<()> {
        if size > self.payload() {
            self.set_payload(size)?;
        }
        Ok(())
    }

    /// Grow or shrink the payload by `delta` bytes
    pub fn adjust_payload(&mut self, delta: i64) -> Result<()> {
        let current = self.payload();
        let magnitude = delta.unsigned_abs() as usize;
        let target = if delta < 0 {
            current.checked_sub(magnitude).ok_or_else(|| {
                DaqError::boundary("Frame::adjust_payload", magnitude as u64, current as u64)
            })?
        } else {
            current + magnitude
        };
        self.set_payload(target)
    }

    pub fn set_payload_full(&mut self) {
        for buffer in &mut self.buffers {
            buffer.set_payload_full();
        }
    }

    pub fn set_payload_empty(&mut self) {
        for buffer in &mut self.buffers {
            buffer.set_payload_empty();
        }
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// First-user field (flags bits 0..7)
    pub fn first_user(&self) -> u8 {
        (self.flags & FIRST_USER_MASK) as u8
    }

    pub fn set_first_user(&mut self, value: u8) {
        self.flags = (self.flags & !FIRST_USER_MASK) | u32::from(value);
    }

    /// Last-user field (flags bits 8..15)
    pub fn last_user(&self) -> u8 {
        ((self.flags & LAST_USER_MASK) >> 8) as u8
    }

    pub fn set_last_user(&mut self, value: u8) {
        self.flags = (self.flags & !LAST_USER_MASK) | (u32::from(value) << 8);
    }

    #[inline]
    pub fn error(&self) -> u32 {
        self.error
    }

    pub fn set_error(&mut self, error: u32) {
        self.error = error;
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    /// Iterator at the start of the usable window
    pub fn begin(&self) -> FrameIterator<'_> {
        FrameIterator::new(self, IterMode::Write, 0)
    }

    /// Iterator one past the usable window
    pub fn end(&self) -> FrameIterator<'_> {
        FrameIterator::new(self, IterMode::Write, self.capacity())
    }

    /// Iterator at the first payload byte
    pub fn begin_payload(&self) -> FrameIterator<'_> {
        FrameIterator::new(self, IterMode::Read, 0)
    }

    /// Iterator one past the last payload byte
    pub fn end_payload(&self) -> FrameIterator<'_> {
        FrameIterator::new(self, IterMode::Read, self.payload())
    }

    /// Copy payload bytes starting at `offset` into `dst`
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let payload = self.payload();
        let end = offset + dst.len();
        if end > payload {
            return Err(DaqError::boundary("Frame::read", end as u64, payload as u64));
        }
        let mut it = self.begin_payload();
        it.advance(offset)?;
        it.read_into(dst)
    }

    /// Copy `src` into the frame at `offset`, raising the payload to cover it
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let capacity = self.capacity();
        let end = offset + src.len();
        if end > capacity {
            return Err(DaqError::boundary("Frame::write", end as u64, capacity as u64));
        }

        let mut skip = offset;
        let mut written = 0;
        for buffer in &mut self.buffers {
            if written == src.len() {
                break;
            }
            let window = buffer.capacity_slice_mut();
            if skip >= window.len() {
                skip -= window.len();
                continue;
            }
            let n = (window.len() - skip).min(src.len() - written);
            window[skip..skip + n].copy_from_slice(&src[written..written + n]);
            written += n;
            skip = 0;
        }
        self.min_payload(end)
    }

    /// Replace this frame's payload with the first `len` payload bytes of `src`
    pub fn copy_payload_from(&mut self, src: &Frame, len: usize) -> Result<()> {
        let len = len.min(src.payload());
        self.set_payload(len)?;
        let mut it = src.begin_payload();
        let mut offset = 0;
        while offset < len {
            let Some(chunk) = it.next_chunk(len - offset) else {
                break;
            };
            self.write(offset, chunk)?;
            offset += chunk.len();
        }
        Ok(())
    }

    /// Payload bytes as one contiguous vector
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffers
            .iter()
            .flat_map(|b| b.payload_slice().iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_ten() -> Frame {
        Frame::from_buffers(vec![Buffer::detached(10), Buffer::detached(10)])
    }

    fn check_accounting(frame: &Frame) {
        assert_eq!(
            frame.payload() + frame.available() + frame.head_reserved() + frame.tail_reserved(),
            frame.size()
        );
        assert_eq!(
            frame.buffers().iter().map(|b| b.payload()).sum::<usize>(),
            frame.payload()
        );
    }

    #[test]
    fn test_set_payload_fills_in_order() {
        let mut frame = two_by_ten();
        frame.set_payload(15).unwrap();
        assert_eq!(frame.buffers()[0].payload(), 10);
        assert_eq!(frame.buffers()[1].payload(), 5);
        check_accounting(&frame);

        frame.set_payload(4).unwrap();
        assert_eq!(frame.buffers()[0].payload(), 4);
        assert_eq!(frame.buffers()[1].payload(), 0);
    }

    #[test]
    fn test_set_payload_over_capacity() {
        let mut frame = two_by_ten();
        frame.set_payload(7).unwrap();
        let err = frame.set_payload(21).unwrap_err();
        match err {
            DaqError::Boundary {
                requested, limit, ..
            } => {
                assert_eq!(requested, 21);
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(frame.payload(), 7);
    }

    #[test]
    fn test_min_payload_never_lowers() {
        let mut frame = two_by_ten();
        frame.set_payload(12).unwrap();
        frame.min_payload(5).unwrap();
        assert_eq!(frame.payload(), 12);
        frame.min_payload(18).unwrap();
        assert_eq!(frame.payload(), 18);
        assert!(frame.min_payload(21).is_err());
    }

    #[test]
    fn test_adjust_payload() {
        let mut frame = two_by_ten();
        frame.adjust_payload(8).unwrap();
        frame.adjust_payload(-3).unwrap();
        assert_eq!(frame.payload(), 5);
        assert!(frame.adjust_payload(-6).is_err());
        assert!(frame.adjust_payload(16).is_err());
        assert_eq!(frame.payload(), 5);
    }

    #[test]
    fn test_write_then_read_across_buffers() {
        let mut frame = two_by_ten();
        frame.write(8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(frame.payload(), 12);

        let mut out = [0u8; 4];
        frame.read(8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(frame.read(10, &mut out).is_err());
        assert!(frame.write(18, &[0; 3]).is_err());
    }

    #[test]
    fn test_append_frame_moves_buffers() {
        let mut a = two_by_ten();
        a.set_payload_full();
        let mut b = Frame::from_buffers(vec![Buffer::detached(4)]);
        b.set_payload(3).unwrap();
        a.append_frame(b);
        assert_eq!(a.buffer_count(), 3);
        assert_eq!(a.payload(), 23);
        check_accounting(&a);
    }

    #[test]
    fn test_user_flags() {
        let mut frame = Frame::new();
        frame.set_flags(0xABCD_0000);
        frame.set_first_user(0x12);
        frame.set_last_user(0x34);
        assert_eq!(frame.flags(), 0xABCD_3412);
        assert_eq!(frame.first_user(), 0x12);
        assert_eq!(frame.last_user(), 0x34);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_copy_payload_truncates() {
        let mut src = two_by_ten();
        let bytes: Vec<u8> = (0..15).collect();
        src.write(0, &bytes).unwrap();

        let mut dst = Frame::from_buffers(vec![Buffer::detached(8), Buffer::detached(8)]);
        dst.copy_payload_from(&src, 12).unwrap();
        assert_eq!(dst.to_vec(), bytes[..12].to_vec());
    }
}
