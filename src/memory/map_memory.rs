//! Memory-mapped device terminal
//!
//! [`MapMemory`] opens a device node (by default `/dev/mem`) and maps windows
//! of it into the process with `mmap`. Transactions falling entirely inside a
//! mapped window are served with a plain memory copy; anything else completes
//! with [`ErrorCode::NoMapping`].
//!
//! The effective address of a transaction is the configured base address plus
//! the transaction address (which already includes every hub offset).

// Mapping offsets come from 64-bit bus addresses; only 64-bit targets are supported
#![allow(clippy::cast_possible_truncation)]

use crate::config::MapMemoryConfig;
use crate::error::{DaqError, ErrorCode, Result, ResultExt};
use crate::lock::lock;
use crate::memory::transaction::Transaction;
use crate::memory::MemorySlave;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

struct Mapping {
    base: u64,
    size: usize,
    ptr: NonNull<u8>,
}

// SAFETY: Send - the mapping is owned by the MapMemory state and only touched
// while holding its mutex. Moving the pointer between threads does not
// invalidate a process-wide mapping.
unsafe impl Send for Mapping {}

impl Mapping {
    /// Byte offset of `[address, address + len)` within this mapping
    fn window(&self, address: u64, len: usize) -> Option<usize> {
        let start = address.checked_sub(self.base)?;
        let end = start.checked_add(len as u64)?;
        (end <= self.size as u64).then_some(start as usize)
    }
}

struct MapState {
    file: Option<File>,
    maps: Vec<Mapping>,
}

/// Terminal slave backed by mmap'd device memory
pub struct MapMemory {
    device_path: PathBuf,
    base_address: u64,
    state: Mutex<MapState>,
}

impl MapMemory {
    pub fn new(config: &MapMemoryConfig) -> Self {
        Self {
            device_path: config.device_path.clone(),
            base_address: config.base_address,
            state: Mutex::new(MapState {
                file: None,
                maps: Vec::new(),
            }),
        }
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    /// Open the device node. Opening an already open device is a no-op.
    pub fn open(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.file.is_some() {
            return Ok(());
        }

        // OFlags bits are small positive values
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(&self.device_path)
            .with_context(|| format!("Failed to open {}", self.device_path.display()))?;

        tracing::info!(target: "daqlink::memory", "Opened {}", self.device_path.display());
        state.file = Some(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).file.is_some()
    }

    /// Map `size` bytes of the device starting at physical address `base`
    pub fn add_map(&self, base: u64, size: usize) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(file) = state.file.as_ref() else {
            return Err(DaqError::Closed(format!(
                "{} is not open",
                self.device_path.display()
            )));
        };
        if size == 0 {
            return Err(DaqError::boundary("MapMemory::add_map", 0u64, 1u64));
        }

        // SAFETY: mmap of a device window.
        // - the fd is open and stays open while the mapping exists (closed only in close())
        // - size is non-zero
        // - READ|WRITE with SHARED so stores reach the device
        // - the returned pointer is only dereferenced within [0, size) under the state lock
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                base,
            )
        }
        .map_err(|e| {
            DaqError::Io(e.into()).with_context(format!(
                "Failed to map 0x{:08X} size 0x{:X} of {}",
                base,
                size,
                self.device_path.display()
            ))
        })?;

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            DaqError::Closed(format!("mmap of 0x{:08X} returned null", base))
        })?;

        tracing::info!(
            target: "daqlink::memory",
            "Mapped 0x{:08X} size 0x{:X} at {:p}",
            base,
            size,
            ptr
        );
        state.maps.push(Mapping { base, size, ptr });
        Ok(())
    }

    /// Number of active mappings
    pub fn map_count(&self) -> usize {
        lock(&self.state).maps.len()
    }

    /// Unmap every window and close the device
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if state.file.is_none() {
            return;
        }
        for map in state.maps.drain(..) {
            // SAFETY: ptr and size are exactly those returned by/passed to mmap in
            // add_map; the mapping is removed from the list so it is never used again.
            if let Err(e) = unsafe { munmap(map.ptr.as_ptr().cast(), map.size) } {
                tracing::error!(target: "daqlink::memory", "munmap of 0x{:08X} failed: {}", map.base, e);
            }
        }
        state.file = None;
        tracing::info!(target: "daqlink::memory", "Closed {}", self.device_path.display());
    }
}

impl Drop for MapMemory {
    fn drop(&mut self) {
        self.close();
    }
}

impl MemorySlave for MapMemory {
    fn address(&self) -> u64 {
        self.base_address
    }

    fn do_transaction(&self, transaction: Arc<Transaction>) {
        let address = self.base_address.wrapping_add(transaction.address());
        let size = transaction.size();
        let len = size as usize;

        // Held across the copy so close() cannot unmap underneath us
        let state = lock(&self.state);
        if state.file.is_none() {
            drop(state);
            transaction.done(ErrorCode::Closed.as_u32());
            return;
        }

        let Some((ptr, offset)) = state
            .maps
            .iter()
            .find_map(|m| m.window(address, len).map(|off| (m.ptr, off)))
        else {
            drop(state);
            tracing::debug!(
                target: "daqlink::memory",
                "{}",
                DaqError::NoMapping { address, size }
            );
            transaction.done(ErrorCode::NoMapping.as_u32());
            return;
        };

        let is_write = transaction.kind().is_write();
        let result = transaction.with_data(|data| {
            // SAFETY: window() guarantees offset + len lies inside the mapping,
            // which stays mapped while the state lock is held. data has len bytes.
            unsafe {
                let dev = ptr.as_ptr().add(offset);
                if is_write {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), dev, len);
                } else {
                    std::ptr::copy_nonoverlapping(dev, data.as_mut_ptr(), len);
                }
            }
        });
        drop(state);

        match result {
            Ok(()) => transaction.done(0),
            Err(e) => transaction.fail(&e),
        }
    }
}

impl std::fmt::Debug for MapMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapMemory")
            .field("device_path", &self.device_path)
            .field("base_address", &format_args!("0x{:08X}", self.base_address))
            .field("open", &self.is_open())
            .field("maps", &self.map_count())
            .finish()
    }
}
