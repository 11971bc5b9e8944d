//! Memory transactions - the unit of work on the memory bus.
//!
//! A [`Transaction`] is created by a [`Master`](super::Master), travels
//! through any number of [`Hub`](super::Hub)s (each adding its offset to the
//! address) and is finally executed by a terminal slave, which must call
//! [`Transaction::done`] exactly once.
//!
//! The transaction does not own its data. It references a window of a
//! [`DataRegion`] owned by the initiator, so a hub that splits a request can
//! hand each piece a sub-window of the same region without copying.

use crate::error::{DaqError, ErrorCode, Result};
use crate::lock::lock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared data region a transaction reads into or writes from
pub type DataRegion = Arc<Mutex<Vec<u8>>>;

/// Create a zero-filled data region of `size` bytes
pub fn data_region(size: usize) -> DataRegion {
    Arc::new(Mutex::new(vec![0u8; size]))
}

/// Callback fired once when a transaction reaches its terminal disposition.
///
/// Runs on whichever thread completed the transaction (terminal slave,
/// reaper or a waiter), so it must be short and must not block.
pub type CompletionCallback = Box<dyn FnOnce(TransactionId, u32) + Send>;

/// Transaction identifier. Zero is never allocated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransactionId(pub u32);

impl TransactionId {
    pub const INVALID: TransactionId = TransactionId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Next id in sequence, wrapping and skipping zero
    #[inline]
    pub fn next(self) -> TransactionId {
        match self.0.wrapping_add(1) {
            0 => TransactionId(1),
            n => TransactionId(n),
        }
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TransactionId(INVALID)")
        } else {
            write!(f, "TransactionId({})", self.0)
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Read from the target into the data region
    Read,
    /// Non-posted write
    Write,
    /// Posted write; the terminal may complete before the write lands
    Post,
    /// Read back for verification after a write
    Verify,
}

impl TransactionKind {
    /// Whether data flows from the region to the target
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, TransactionKind::Write | TransactionKind::Post)
    }
}

/// Disposition of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Still in flight
    Pending,
    /// Completed by a slave with the given code
    Done(u32),
    /// Deadline passed before completion
    Timeout,
    /// Abandoned because the master shut down
    Expired,
}

impl TransactionStatus {
    /// Completion code, or `None` while pending
    pub fn code(self) -> Option<u32> {
        match self {
            TransactionStatus::Pending => None,
            TransactionStatus::Done(code) => Some(code),
            TransactionStatus::Timeout => Some(ErrorCode::Timeout.as_u32()),
            TransactionStatus::Expired => Some(ErrorCode::Shutdown.as_u32()),
        }
    }

    #[inline]
    pub fn is_pending(self) -> bool {
        self == TransactionStatus::Pending
    }
}

struct TransactionState {
    status: TransactionStatus,
    completed_at: Option<Instant>,
    callbacks: Vec<CompletionCallback>,
}

/// One read/write work item on the memory bus
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    requested_address: u64,
    address: AtomicU64,
    size: u32,
    data: DataRegion,
    data_offset: usize,
    submitted: Instant,
    deadline: Instant,
    state: Mutex<TransactionState>,
    cond: Condvar,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TransactionId,
        kind: TransactionKind,
        address: u64,
        size: u32,
        data: DataRegion,
        data_offset: usize,
        timeout: Duration,
        callbacks: Vec<CompletionCallback>,
    ) -> Self {
        let submitted = Instant::now();
        Self {
            id,
            kind,
            requested_address: address,
            address: AtomicU64::new(address),
            size,
            data,
            data_offset,
            submitted,
            deadline: submitted + timeout,
            state: Mutex::new(TransactionState {
                status: TransactionStatus::Pending,
                completed_at: None,
                callbacks,
            }),
            cond: Condvar::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Current address, including every hub offset applied so far
    #[inline]
    pub fn address(&self) -> u64 {
        self.address.load(Ordering::Acquire)
    }

    /// Address as originally requested by the master
    #[inline]
    pub fn requested_address(&self) -> u64 {
        self.requested_address
    }

    /// Apply a hub offset before forwarding downstream
    pub fn add_offset(&self, offset: u64) {
        self.address.fetch_add(offset, Ordering::AcqRel);
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn submitted(&self) -> Instant {
        self.submitted
    }

    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Shared region and the offset of this transaction's window within it
    pub fn region(&self) -> (&DataRegion, usize) {
        (&self.data, self.data_offset)
    }

    /// Run `f` over this transaction's window of the data region.
    ///
    /// Fails with a boundary error if the region shrank below the window.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut data = lock(&self.data);
        let end = self.data_offset + self.size as usize;
        if end > data.len() {
            return Err(DaqError::boundary(
                "Transaction::with_data",
                end as u64,
                data.len() as u64,
            ));
        }
        Ok(f(&mut data[self.data_offset..end]))
    }

    pub fn status(&self) -> TransactionStatus {
        lock(&self.state).status
    }

    /// Time from submission to disposition, if disposed
    pub fn latency(&self) -> Option<Duration> {
        lock(&self.state)
            .completed_at
            .map(|t| t.saturating_duration_since(self.submitted))
    }

    /// Register a callback to run at disposition.
    ///
    /// If the transaction is already disposed the callback runs immediately
    /// on the calling thread.
    pub fn on_complete(&self, callback: impl FnOnce(TransactionId, u32) + Send + 'static) {
        let mut state = lock(&self.state);
        match state.status.code() {
            None => state.callbacks.push(Box::new(callback)),
            Some(code) => {
                drop(state);
                callback(self.id, code);
            }
        }
    }

    /// Complete the transaction with a result code.
    ///
    /// The first call wins. A repeat with the same code is a no-op; a
    /// completion arriving after a timeout or shutdown is absorbed.
    pub fn done(&self, code: u32) {
        self.dispose(TransactionStatus::Done(code));
    }

    /// Complete the transaction with an error
    pub fn fail(&self, err: &DaqError) {
        self.done(err.code().as_u32());
    }

    /// Move to a terminal status. Returns `false` if already disposed.
    pub(crate) fn dispose(&self, status: TransactionStatus) -> bool {
        let Some(code) = status.code() else {
            return false;
        };

        let callbacks = {
            let mut state = lock(&self.state);
            match state.status {
                TransactionStatus::Pending => {
                    state.status = status;
                    state.completed_at = Some(Instant::now());
                    std::mem::take(&mut state.callbacks)
                }
                TransactionStatus::Done(prev) => {
                    if let TransactionStatus::Done(new) = status {
                        debug_assert_eq!(prev, new, "transaction {} completed twice", self.id);
                        if prev != new {
                            tracing::warn!(
                                target: "daqlink::memory",
                                "Transaction {} completed twice with different codes ({} then {})",
                                self.id,
                                prev,
                                new
                            );
                        }
                    }
                    return false;
                }
                TransactionStatus::Timeout | TransactionStatus::Expired => {
                    tracing::debug!(
                        target: "daqlink::memory",
                        "Late completion of {} absorbed (status {:?})",
                        self.id,
                        state.status
                    );
                    return false;
                }
            }
        };

        self.cond.notify_all();
        for callback in callbacks {
            callback(self.id, code);
        }
        true
    }

    /// Expire the transaction if its deadline has passed
    pub(crate) fn expire_if_due(&self, now: Instant) -> bool {
        now >= self.deadline && self.dispose(TransactionStatus::Timeout)
    }

    /// Block until disposition or until `timeout` elapses.
    ///
    /// Returns the status at return time; a `Pending` result means the wait
    /// timed out and the transaction is still in flight. A waiter that
    /// outlives the transaction deadline expires it, exactly as the reaper
    /// would.
    pub fn wait(&self, timeout: Duration) -> TransactionStatus {
        let wait_until = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if !state.status.is_pending() {
                return state.status;
            }
            let now = Instant::now();
            if now >= self.deadline {
                drop(state);
                self.expire_if_due(now);
                return self.status();
            }
            if now >= wait_until {
                return state.status;
            }
            let wake = wait_until.min(self.deadline);
            state = match self.cond.wait_timeout(state, wake - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("address", &format_args!("0x{:08X}", self.address()))
            .field("size", &self.size)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn make(timeout: Duration) -> Transaction {
        Transaction::new(
            TransactionId(7),
            TransactionKind::Read,
            0x100,
            4,
            data_region(8),
            4,
            timeout,
            Vec::new(),
        )
    }

    #[test]
    fn test_id_skips_zero() {
        assert_eq!(TransactionId(u32::MAX).next(), TransactionId(1));
        assert_eq!(TransactionId(1).next(), TransactionId(2));
        assert!(!TransactionId::INVALID.is_valid());
    }

    #[test]
    fn test_done_is_idempotent() {
        let tran = make(Duration::from_secs(5));
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        tran.on_complete(move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tran.done(0);
        tran.done(0);
        assert_eq!(tran.status(), TransactionStatus::Done(0));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(tran.latency().is_some());
    }

    #[test]
    fn test_late_done_after_timeout_is_absorbed() {
        let tran = make(Duration::ZERO);
        assert!(tran.expire_if_due(Instant::now()));
        tran.done(0);
        assert_eq!(tran.status(), TransactionStatus::Timeout);
        assert_eq!(tran.status().code(), Some(ErrorCode::Timeout.as_u32()));
    }

    #[test]
    fn test_wait_returns_pending_on_wait_timeout() {
        let tran = make(Duration::from_secs(5));
        let status = tran.wait(Duration::from_millis(5));
        assert_eq!(status, TransactionStatus::Pending);
    }

    #[test]
    fn test_wait_woken_by_done() {
        let tran = Arc::new(make(Duration::from_secs(5)));
        let t = tran.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            t.done(3);
        });
        assert_eq!(tran.wait(Duration::from_secs(2)), TransactionStatus::Done(3));
        handle.join().unwrap();
    }

    #[test]
    fn test_with_data_window() {
        let tran = make(Duration::from_secs(1));
        tran.with_data(|buf| buf.copy_from_slice(&[1, 2, 3, 4])).unwrap();
        let (region, offset) = tran.region();
        assert_eq!(offset, 4);
        assert_eq!(&region.lock().unwrap()[..], &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_add_offset() {
        let tran = make(Duration::from_secs(1));
        tran.add_offset(0x1000);
        tran.add_offset(0x40);
        assert_eq!(tran.address(), 0x1140);
        assert_eq!(tran.requested_address(), 0x100);
    }

    #[test]
    fn test_on_complete_after_disposition_runs_immediately() {
        let tran = make(Duration::from_secs(1));
        tran.done(5);
        let seen = Arc::new(AtomicU32::new(0));
        let s = seen.clone();
        tran.on_complete(move |_, code| s.store(code, Ordering::SeqCst));
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
