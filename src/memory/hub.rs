//! Address-translating hub
//!
//! A [`Hub`] is a slave to its upstream and a master to its downstream. It
//! adds a fixed offset to every transaction it forwards. A hub created with
//! non-zero min and max access becomes a *virtual root*: it reports its own
//! access limits and an address of 0 instead of composing through its
//! downstream.

use crate::error::{DaqError, ErrorCode, Result};
use crate::memory::master::{Master, TransactionRequest};
use crate::memory::transaction::Transaction;
use crate::memory::MemorySlave;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Hub {
    offset: u64,
    min_access: u32,
    max_access: u32,
    root: bool,
    master: Master,
}

impl Hub {
    /// Plain translating hub; access limits delegate downstream
    pub fn new(offset: u64) -> Self {
        Self::with_limits(offset, 0, 0)
    }

    /// Hub with access limit overrides. Non-zero `min` and `max` make it a virtual root.
    pub fn with_limits(offset: u64, min_access: u32, max_access: u32) -> Self {
        Self {
            offset,
            min_access,
            max_access,
            root: min_access > 0 && max_access > 0,
            master: Master::new(format!("hub@0x{:08X}", offset)),
        }
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Attach the downstream slave
    pub fn set_slave(&self, slave: Arc<dyn MemorySlave>) {
        self.master.set_slave(slave);
    }

    /// Downstream master, for hubs that issue their own sub-transactions
    pub fn master(&self) -> &Master {
        &self.master
    }

    /// Validate a transaction size against this hub's effective access limits
    pub fn check_access(&self, size: u32) -> Result<()> {
        let min_access = self.min_access();
        let max_access = self.max_access();
        let min = min_access.max(1);
        let max = if max_access == 0 { u32::MAX } else { max_access };
        if size % min != 0 || size > max {
            return Err(DaqError::Alignment {
                size,
                min_access,
                max_access,
            });
        }
        Ok(())
    }

    /// Translate and hand the transaction to the downstream slave
    pub fn forward(&self, transaction: Arc<Transaction>) {
        match self.master.slave() {
            Some(slave) => {
                transaction.add_offset(self.offset);
                slave.do_transaction(transaction);
            }
            None => {
                tracing::debug!(
                    target: "daqlink::memory",
                    "Hub at offset 0x{:X} has no downstream for {}",
                    self.offset,
                    transaction.id()
                );
                transaction.done(ErrorCode::Closed.as_u32());
            }
        }
    }
}

impl MemorySlave for Hub {
    fn min_access(&self) -> u32 {
        if self.root {
            self.min_access
        } else {
            self.master.slave_min_access()
        }
    }

    fn max_access(&self) -> u32 {
        if self.root {
            self.max_access
        } else {
            self.master.slave_max_access()
        }
    }

    fn address(&self) -> u64 {
        if self.root {
            0
        } else {
            self.master.slave_address().wrapping_add(self.offset)
        }
    }

    fn do_transaction(&self, transaction: Arc<Transaction>) {
        if let Err(e) = self.check_access(transaction.size()) {
            tracing::debug!(target: "daqlink::memory", "{} rejected: {}", transaction.id(), e);
            transaction.fail(&e);
            return;
        }
        self.forward(transaction);
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("offset", &format_args!("0x{:X}", self.offset))
            .field("root", &self.root)
            .field("min_access", &self.min_access)
            .field("max_access", &self.max_access)
            .finish()
    }
}

/// Split `upstream` into `requests` issued through `hub`'s downstream master
/// and complete it once every piece has settled.
///
/// Piece addresses are hub-local, like the upstream transaction's; the hub
/// offset is added to each and each size is checked against the hub's access
/// limits, exactly as [`Hub::forward`] would for a single transaction.
///
/// The upstream code is the first non-zero code reported by any piece, or 0
/// when all succeed. A piece that is rejected or cannot be submitted counts
/// as settled with its error code.
pub fn fanout(upstream: Arc<Transaction>, hub: &Hub, requests: Vec<TransactionRequest>) {
    if requests.is_empty() {
        upstream.done(0);
        return;
    }

    let remaining = Arc::new(AtomicUsize::new(requests.len()));
    let error = Arc::new(AtomicU32::new(0));

    let settle = {
        let remaining = remaining.clone();
        let error = error.clone();
        let upstream = upstream.clone();
        move |code: u32| {
            if code != 0 {
                let _ = error.compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire);
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                upstream.done(error.load(Ordering::Acquire));
            }
        }
    };

    for mut request in requests {
        if let Err(e) = hub.check_access(request.size) {
            tracing::debug!(
                target: "daqlink::memory",
                "Fan-out piece of {} rejected: {}",
                upstream.id(),
                e
            );
            settle(e.code().as_u32());
            continue;
        }
        request.address = request.address.wrapping_add(hub.offset);

        let on_settle = settle.clone();
        let request = request.on_complete(move |_, code| on_settle(code));
        if let Err(e) = hub.master.submit(request) {
            tracing::debug!(
                target: "daqlink::memory",
                "Fan-out piece of {} not submitted: {}",
                upstream.id(),
                e
            );
            settle(e.code().as_u32());
        }
    }
}
