//! Stream buffer - one contiguous region inside a frame
//!
//! Layout of a buffer region:
//!
//! ```text
//! | head reserve | payload ... | free ... | tail reserve |
//! 0              head                     size - tail    size
//! ```
//!
//! A buffer allocated from a [`Pool`] returns its region to the pool when
//! dropped.

use crate::error::{DaqError, Result};
use crate::stream::pool::Pool;
use std::sync::Arc;

pub struct Buffer {
    data: Option<Box<[u8]>>,
    head: usize,
    tail: usize,
    payload: usize,
    pool: Option<Arc<Pool>>,
}

impl Buffer {
    pub(crate) fn from_pool(data: Box<[u8]>, pool: Arc<Pool>) -> Self {
        Self {
            data: Some(data),
            head: 0,
            tail: 0,
            payload: 0,
            pool: Some(pool),
        }
    }

    /// Heap buffer not owned by any pool
    pub fn detached(size: usize) -> Self {
        Self {
            data: Some(vec![0u8; size].into_boxed_slice()),
            head: 0,
            tail: 0,
            payload: 0,
            pool: None,
        }
    }

    /// Raw region size including reservations
    #[inline]
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    #[inline]
    pub fn head_reserved(&self) -> usize {
        self.head
    }

    #[inline]
    pub fn tail_reserved(&self) -> usize {
        self.tail
    }

    /// Bytes usable for payload
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size() - self.head - self.tail
    }

    #[inline]
    pub fn payload(&self) -> usize {
        self.payload
    }

    /// Free payload space
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.payload
    }

    pub fn set_payload(&mut self, size: usize) -> Result<()> {
        if size > self.capacity() {
            return Err(DaqError::boundary(
                "Buffer::set_payload",
                size as u64,
                self.capacity() as u64,
            ));
        }
        self.payload = size;
        Ok(())
    }

    pub fn set_payload_full(&mut self) {
        self.payload = self.capacity();
    }

    pub fn set_payload_empty(&mut self) {
        self.payload = 0;
    }

    /// Reserve `size` more bytes at the front of the region
    pub fn reserve_head(&mut self, size: usize) -> Result<()> {
        if size > self.available() {
            return Err(DaqError::boundary(
                "Buffer::reserve_head",
                size as u64,
                self.available() as u64,
            ));
        }
        self.head += size;
        Ok(())
    }

    /// Reserve `size` more bytes at the end of the region
    pub fn reserve_tail(&mut self, size: usize) -> Result<()> {
        if size > self.available() {
            return Err(DaqError::boundary(
                "Buffer::reserve_tail",
                size as u64,
                self.available() as u64,
            ));
        }
        self.tail += size;
        Ok(())
    }

    /// Filled payload bytes
    pub fn payload_slice(&self) -> &[u8] {
        let start = self.head;
        self.data
            .as_deref()
            .map_or(&[][..], |d| &d[start..start + self.payload])
    }

    /// Whole usable window (payload plus free space)
    pub fn capacity_slice(&self) -> &[u8] {
        let (start, end) = (self.head, self.size() - self.tail);
        self.data.as_deref().map_or(&[][..], |d| &d[start..end])
    }

    pub fn capacity_slice_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.head, self.size() - self.tail);
        self.data.as_deref_mut().map_or(&mut [][..], |d| &mut d[start..end])
    }

    /// Whether the region came from a pool
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let (Some(pool), Some(data)) = (self.pool.take(), self.data.take()) {
            pool.release(data);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("payload", &self.payload)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
