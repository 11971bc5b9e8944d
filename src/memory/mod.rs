//! Memory-transaction pipeline
//!
//! Register reads and writes travel as [`Transaction`]s from a [`Master`]
//! through a chain of [`Hub`]s to a terminal [`MemorySlave`]:
//!
//! ```text
//! Master -> Hub (offset) -> Hub (offset) -> MapMemory / Emulate
//! ```
//!
//! Each hub adds its offset to the transaction address on the way down.
//! The terminal completes every transaction with a numeric code
//! ([`ErrorCode`](crate::error::ErrorCode)); errors never unwind across the
//! chain.

pub mod emulate;
pub mod hub;
pub mod map_memory;
pub mod master;
pub mod stats;
pub mod transaction;

pub use emulate::Emulate;
pub use hub::{fanout, Hub};
pub use map_memory::MapMemory;
pub use master::{Master, TransactionRequest};
pub use stats::BusStats;
pub use transaction::{
    data_region, CompletionCallback, DataRegion, Transaction, TransactionId, TransactionKind,
    TransactionStatus,
};

use std::sync::Arc;

/// Downstream side of the memory bus
///
/// Implemented by terminal devices and by [`Hub`]. Implementations must
/// eventually call [`Transaction::done`] on every transaction they accept,
/// including on error paths.
#[cfg_attr(test, mockall::automock)]
pub trait MemorySlave: Send + Sync {
    /// Smallest access granularity in bytes
    fn min_access(&self) -> u32 {
        1
    }

    /// Largest single access in bytes
    fn max_access(&self) -> u32 {
        u32::MAX
    }

    /// Base address of this slave as seen from above
    fn address(&self) -> u64 {
        0
    }

    /// Execute or forward a transaction
    fn do_transaction(&self, transaction: Arc<Transaction>);
}
