//! RAM-backed terminal slave
//!
//! Stores written bytes in sparse 4 KiB pages allocated on first touch.
//! Unwritten memory reads back as zero. Useful for loopback setups and tests
//! where no hardware is attached.

use crate::error::DaqError;
use crate::lock::lock;
use crate::memory::transaction::{Transaction, TransactionKind};
use crate::memory::MemorySlave;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const PAGE_SIZE: u64 = 0x1000;

pub struct Emulate {
    min_access: u32,
    max_access: u32,
    pages: Mutex<HashMap<u64, Box<[u8; PAGE_SIZE as usize]>>>,
}

impl Emulate {
    pub fn new(min_access: u32, max_access: u32) -> Self {
        Self {
            min_access,
            max_access,
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Copy `size` bytes starting at `address` out of emulated memory.
    /// Bytes past the top of the address space read as zero.
    pub fn peek(&self, address: u64, size: usize) -> Vec<u8> {
        let mut out = vec![0u8; size];
        let pages = lock(&self.pages);
        let mut done = 0usize;
        while done < size {
            let Some(addr) = address.checked_add(done as u64) else {
                break;
            };
            let page_off = (addr % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - page_off).min(size - done);
            if let Some(page) = pages.get(&(addr / PAGE_SIZE)) {
                out[done..done + chunk].copy_from_slice(&page[page_off..page_off + chunk]);
            }
            done += chunk;
        }
        out
    }

    /// Write `bytes` at `address`, allocating pages as needed. Bytes past the
    /// top of the address space are dropped.
    pub fn poke(&self, address: u64, bytes: &[u8]) {
        let mut pages = lock(&self.pages);
        let mut done = 0usize;
        while done < bytes.len() {
            let Some(addr) = address.checked_add(done as u64) else {
                break;
            };
            let page_off = (addr % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - page_off).min(bytes.len() - done);
            let page = pages
                .entry(addr / PAGE_SIZE)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE as usize]));
            page[page_off..page_off + chunk].copy_from_slice(&bytes[done..done + chunk]);
            done += chunk;
        }
    }

    /// Number of 4 KiB pages touched by writes
    pub fn page_count(&self) -> usize {
        lock(&self.pages).len()
    }
}

impl Default for Emulate {
    fn default() -> Self {
        Self::new(4, 0x1000)
    }
}

impl MemorySlave for Emulate {
    fn min_access(&self) -> u32 {
        self.min_access
    }

    fn max_access(&self) -> u32 {
        self.max_access
    }

    fn do_transaction(&self, transaction: Arc<Transaction>) {
        let address = transaction.address();
        let size = transaction.size() as usize;

        let last = u64::from(transaction.size().saturating_sub(1));
        if address.checked_add(last).is_none() {
            transaction.fail(&DaqError::boundary(
                "Emulate::do_transaction",
                address,
                u64::MAX - last,
            ));
            return;
        }

        let result = match transaction.kind() {
            TransactionKind::Write | TransactionKind::Post => {
                transaction.with_data(|data| self.poke(address, data))
            }
            TransactionKind::Read | TransactionKind::Verify => {
                let bytes = self.peek(address, size);
                transaction.with_data(|data| data.copy_from_slice(&bytes))
            }
        };

        match result {
            Ok(()) => transaction.done(0),
            Err(e) => transaction.fail(&e),
        }
    }
}
