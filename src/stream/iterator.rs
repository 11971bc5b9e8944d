//! Random-access cursor over a frame's logical byte stream
//!
//! A [`FrameIterator`] walks the buffers of a [`Frame`] as if they were one
//! contiguous array. It caches the current buffer and its starting position,
//! so moving by `n` only visits the buffers in between.
//!
//! Two windows exist per frame:
//!
//! - [`IterMode::Read`] covers the filled payload of each buffer
//! - [`IterMode::Write`] covers the usable capacity of each buffer
//!
//! Whenever the cursor sits exactly on a buffer boundary it is placed at
//! offset 0 of the following buffer.

use crate::error::{DaqError, Result};
use crate::stream::frame::Frame;
use std::cmp::Ordering;
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterMode {
    /// Walk payload bytes
    Read,
    /// Walk the whole usable window
    Write,
}

#[derive(Clone, Copy)]
pub struct FrameIterator<'a> {
    frame: &'a Frame,
    mode: IterMode,
    pos: usize,
    limit: usize,
    buf_idx: usize,
    buf_start: usize,
}

impl<'a> FrameIterator<'a> {
    pub(crate) fn new(frame: &'a Frame, mode: IterMode, pos: usize) -> Self {
        let limit = match mode {
            IterMode::Read => frame.payload(),
            IterMode::Write => frame.capacity(),
        };
        let mut it = Self {
            frame,
            mode,
            pos: 0,
            limit,
            buf_idx: 0,
            buf_start: 0,
        };
        it.pos = pos.min(limit);
        it.seek_forward();
        it
    }

    fn segment_len(&self, idx: usize) -> usize {
        let buffer = &self.frame.buffers()[idx];
        match self.mode {
            IterMode::Read => buffer.payload(),
            IterMode::Write => buffer.capacity(),
        }
    }

    fn segment(&self, idx: usize) -> &'a [u8] {
        let buffer = &self.frame.buffers()[idx];
        let slice = buffer.capacity_slice();
        &slice[..self.segment_len(idx)]
    }

    fn seek_forward(&mut self) {
        let count = self.frame.buffer_count();
        while self.buf_idx + 1 < count && self.pos >= self.buf_start + self.segment_len(self.buf_idx) {
            self.buf_start += self.segment_len(self.buf_idx);
            self.buf_idx += 1;
        }
    }

    fn seek_backward(&mut self) {
        while self.pos < self.buf_start && self.buf_idx > 0 {
            self.buf_idx -= 1;
            self.buf_start -= self.segment_len(self.buf_idx);
        }
        self.seek_forward();
    }

    #[inline]
    pub fn mode(&self) -> IterMode {
        self.mode
    }

    /// Logical position from the start of the window
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes between the cursor and the end of the window
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.pos == self.limit
    }

    /// Index of the buffer the cursor is in
    #[inline]
    pub fn buffer_index(&self) -> usize {
        self.buf_idx
    }

    /// Offset of the cursor within the current buffer's window
    #[inline]
    pub fn buffer_offset(&self) -> usize {
        self.pos - self.buf_start
    }

    /// Move forward by `n` bytes
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(DaqError::boundary(
                "FrameIterator::advance",
                (self.pos + n) as u64,
                self.limit as u64,
            ));
        }
        self.pos += n;
        self.seek_forward();
        Ok(())
    }

    /// Move backward by `n` bytes
    pub fn retreat(&mut self, n: usize) -> Result<()> {
        if n > self.pos {
            return Err(DaqError::boundary(
                "FrameIterator::retreat",
                n as u64,
                self.pos as u64,
            ));
        }
        self.pos -= n;
        self.seek_backward();
        Ok(())
    }

    /// Byte under the cursor, `None` at the end of the window
    pub fn get(&self) -> Option<u8> {
        if self.is_end() {
            return None;
        }
        self.segment(self.buf_idx).get(self.buffer_offset()).copied()
    }

    /// Longest contiguous run (at most `max` bytes) from the cursor, advancing past it
    pub fn next_chunk(&mut self, max: usize) -> Option<&'a [u8]> {
        if self.is_end() || max == 0 {
            return None;
        }
        let offset = self.buffer_offset();
        let segment = self.segment(self.buf_idx);
        let n = (segment.len() - offset).min(max).min(self.remaining());
        let chunk = &segment[offset..offset + n];
        self.pos += n;
        self.seek_forward();
        Some(chunk)
    }

    /// Fill `dst` from the cursor, advancing past the copied bytes
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.remaining() {
            return Err(DaqError::boundary(
                "FrameIterator::read_into",
                (self.pos + dst.len()) as u64,
                self.limit as u64,
            ));
        }
        let mut copied = 0;
        while copied < dst.len() {
            match self.next_chunk(dst.len() - copied) {
                Some(chunk) => {
                    dst[copied..copied + chunk.len()].copy_from_slice(chunk);
                    copied += chunk.len();
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Signed distance from `other` to `self`
    pub fn distance(&self, other: &FrameIterator<'_>) -> isize {
        self.pos as isize - other.pos as isize
    }

    fn same_frame(&self, other: &FrameIterator<'_>) -> bool {
        std::ptr::eq(self.frame, other.frame)
    }
}

impl PartialEq for FrameIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.same_frame(other) && self.pos == other.pos
    }
}

impl Eq for FrameIterator<'_> {}

impl PartialOrd for FrameIterator<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.same_frame(other).then(|| self.pos.cmp(&other.pos))
    }
}

/// Panics when moved outside the window
impl Add<usize> for FrameIterator<'_> {
    type Output = Self;

    fn add(mut self, n: usize) -> Self {
        if let Err(e) = self.advance(n) {
            panic!("{}", e);
        }
        self
    }
}

/// Panics when moved before the window start
impl Sub<usize> for FrameIterator<'_> {
    type Output = Self;

    fn sub(mut self, n: usize) -> Self {
        if let Err(e) = self.retreat(n) {
            panic!("{}", e);
        }
        self
    }
}

impl Iterator for FrameIterator<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let byte = self.get()?;
        self.pos += 1;
        self.seek_forward();
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for FrameIterator<'_> {}

impl std::fmt::Debug for FrameIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameIterator")
            .field("mode", &self.mode)
            .field("pos", &self.pos)
            .field("limit", &self.limit)
            .field("buffer", &self.buf_idx)
            .field("offset", &self.buffer_offset())
            .finish()
    }
}
