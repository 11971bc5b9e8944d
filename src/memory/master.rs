//! Memory master - the initiator side of the memory bus.
//!
//! A [`Master`] allocates transaction ids, keeps every transaction it created
//! in a pending table until its disposition has been observed, and hands the
//! transaction to the attached [`MemorySlave`]. Completion is asynchronous:
//! callers either block in [`Master::wait_transaction`] or register a callback
//! on the [`TransactionRequest`].
//!
//! # Timeout reaper
//!
//! The first request spawns a single reaper thread per master. It sweeps the
//! pending table on a fixed tick and expires transactions whose deadline has
//! passed. A slave that completes an expired transaction later is silently
//! ignored. The reaper stops when the master shuts down or the last handle is
//! dropped.

use crate::error::{DaqError, ErrorCode, Result};
use crate::lock::{lock, read, write};
use crate::memory::stats::BusStats;
use crate::memory::transaction::{
    CompletionCallback, DataRegion, Transaction, TransactionId, TransactionKind, TransactionStatus,
};
use crate::memory::MemorySlave;
use crossbeam_channel::{select, tick, Sender};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Parameters for one transaction
pub struct TransactionRequest {
    pub address: u64,
    pub size: u32,
    pub kind: TransactionKind,
    pub data: DataRegion,
    pub data_offset: usize,
    /// Overrides the master's default timeout
    pub timeout: Option<Duration>,
    callback: Option<CompletionCallback>,
}

impl TransactionRequest {
    pub fn new(address: u64, size: u32, data: DataRegion, kind: TransactionKind) -> Self {
        Self {
            address,
            size,
            kind,
            data,
            data_offset: 0,
            timeout: None,
            callback: None,
        }
    }

    /// Use the window starting at `offset` of the data region
    pub fn at_offset(mut self, offset: usize) -> Self {
        self.data_offset = offset;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Callback fired once at disposition, on the completing thread
    pub fn on_complete(mut self, f: impl FnOnce(TransactionId, u32) + Send + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for TransactionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRequest")
            .field("address", &format_args!("0x{:08X}", self.address))
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("data_offset", &self.data_offset)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

struct PendingTable {
    last_id: TransactionId,
    pending: HashMap<TransactionId, Arc<Transaction>>,
    /// Entries whose waiter gave up; retired as soon as they are disposed
    orphaned: HashSet<TransactionId>,
}

/// Thread currently handing transactions downstream, and the requests it
/// issued from inside completion callbacks while doing so
#[derive(Default)]
struct Dispatch {
    owner: Option<ThreadId>,
    deferred: VecDeque<(Arc<dyn MemorySlave>, Arc<Transaction>)>,
}

/// Releases dispatch ownership even if a slave panics
struct DispatchGuard<'a>(&'a Mutex<Dispatch>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut dispatch = lock(self.0);
        dispatch.owner = None;
        dispatch.deferred.clear();
    }
}

struct Reaper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

struct MasterShared {
    name: String,
    slave: RwLock<Option<Arc<dyn MemorySlave>>>,
    /// Serializes id allocation and downstream submission
    submit: Mutex<()>,
    dispatch: Mutex<Dispatch>,
    table: Mutex<PendingTable>,
    timeout_us: AtomicU64,
    reaper_interval: Duration,
    reaper: Mutex<Option<Reaper>>,
    stats: Mutex<BusStats>,
    shut_down: AtomicBool,
}

impl MasterShared {
    /// Disposition hook installed ahead of any user callback
    fn on_disposed(&self, id: TransactionId, code: u32, retire: bool) {
        let tran = {
            let mut table = lock(&self.table);
            if table.orphaned.remove(&id) || retire {
                table.pending.remove(&id)
            } else {
                table.pending.get(&id).cloned()
            }
        };

        let mut stats = lock(&self.stats);
        match tran.as_ref().map(|t| t.status()) {
            Some(TransactionStatus::Timeout) => stats.record_timeout(),
            Some(TransactionStatus::Expired) => stats.record_expired(),
            _ if code == 0 => {
                let (latency, bytes) = tran
                    .as_ref()
                    .map(|t| {
                        (
                            t.latency().unwrap_or_default().as_micros() as u64,
                            t.size() as u64,
                        )
                    })
                    .unwrap_or((0, 0));
                stats.record_success(latency, bytes);
            }
            _ => stats.record_failure(),
        }
    }

    /// Expire every pending transaction whose deadline has passed
    fn sweep(&self, now: Instant) {
        let due: Vec<Arc<Transaction>> = lock(&self.table)
            .pending
            .values()
            .filter(|t| t.status().is_pending() && t.deadline() <= now)
            .cloned()
            .collect();

        for tran in due {
            if tran.expire_if_due(now) {
                tracing::debug!(
                    target: "daqlink::memory",
                    "{}: transaction {} at 0x{:08X} timed out",
                    self.name,
                    tran.id(),
                    tran.address()
                );
            }
        }
    }

    fn stop_reaper(&self) {
        if let Some(reaper) = lock(&self.reaper).take() {
            drop(reaper.stop_tx);
            // The last handle may be released from the reaper thread itself
            if reaper.handle.thread().id() != thread::current().id() {
                let _ = reaper.handle.join();
            }
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_reaper();

        let abandoned: Vec<Arc<Transaction>> = lock(&self.table).pending.values().cloned().collect();
        let mut count = 0usize;
        for tran in abandoned {
            if tran.dispose(TransactionStatus::Expired) {
                count += 1;
            }
        }
        if count > 0 {
            tracing::warn!(
                target: "daqlink::memory",
                "{}: shutdown abandoned {} pending transactions",
                self.name,
                count
            );
        }
        tracing::debug!(target: "daqlink::memory", "{}: {}", self.name, lock(&self.stats));
    }
}

impl Drop for MasterShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Memory bus initiator
///
/// Cloning a `Master` yields another handle to the same pending table.
#[derive(Clone)]
pub struct Master {
    shared: Arc<MasterShared>,
}

impl Master {
    /// Create a master with default timeout and reaper interval
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &crate::config::MemoryConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &crate::config::MemoryConfig) -> Self {
        Self {
            shared: Arc::new(MasterShared {
                name: name.into(),
                slave: RwLock::new(None),
                submit: Mutex::new(()),
                dispatch: Mutex::new(Dispatch::default()),
                table: Mutex::new(PendingTable {
                    last_id: TransactionId::INVALID,
                    pending: HashMap::new(),
                    orphaned: HashSet::new(),
                }),
                timeout_us: AtomicU64::new(config.timeout_us),
                reaper_interval: Duration::from_micros(config.reaper_interval_us.max(1)),
                reaper: Mutex::new(None),
                stats: Mutex::new(BusStats::default()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Attach the downstream slave or hub
    pub fn set_slave(&self, slave: Arc<dyn MemorySlave>) {
        *write(&self.shared.slave) = Some(slave);
    }

    pub fn slave(&self) -> Option<Arc<dyn MemorySlave>> {
        read(&self.shared.slave).clone()
    }

    /// Base address reported by the attached slave (0 when detached)
    pub fn slave_address(&self) -> u64 {
        self.slave().map(|s| s.address()).unwrap_or(0)
    }

    /// Minimum access size reported by the attached slave (0 when detached)
    pub fn slave_min_access(&self) -> u32 {
        self.slave().map(|s| s.min_access()).unwrap_or(0)
    }

    /// Maximum access size reported by the attached slave (0 when detached)
    pub fn slave_max_access(&self) -> u32 {
        self.slave().map(|s| s.max_access()).unwrap_or(0)
    }

    /// Default deadline stamped on new transactions
    pub fn set_timeout(&self, microseconds: u64) {
        self.shared.timeout_us.store(microseconds, Ordering::Release);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.shared.timeout_us.load(Ordering::Acquire))
    }

    /// Issue a transaction and return its id immediately
    pub fn req_transaction(
        &self,
        address: u64,
        size: u32,
        data: &DataRegion,
        kind: TransactionKind,
    ) -> Result<TransactionId> {
        self.submit(TransactionRequest::new(address, size, data.clone(), kind))
            .map(|t| t.id())
    }

    /// Issue a transaction described by `request` and return its handle.
    ///
    /// Slaves may complete synchronously, so completion callbacks can run
    /// before this returns. A callback that submits on the same master is
    /// queued and handed downstream once the outer transaction has been
    /// delivered, keeping downstream order equal to id order. Blocking
    /// helpers such as [`Master::read`] must not be called from such a
    /// callback since the queued request cannot start until it returns.
    pub fn submit(&self, request: TransactionRequest) -> Result<Arc<Transaction>> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(DaqError::Shutdown(format!("master {} is shut down", self.shared.name)));
        }

        let region_len = lock(&request.data).len();
        let end = request.data_offset + request.size as usize;
        if end > region_len {
            return Err(DaqError::boundary(
                "Master::submit",
                end as u64,
                region_len as u64,
            ));
        }

        let slave = self.slave().ok_or_else(|| {
            DaqError::Closed(format!("master {} has no slave attached", self.shared.name))
        })?;

        self.ensure_reaper()?;

        let me = thread::current().id();
        if lock(&self.shared.dispatch).owner == Some(me) {
            // Nested submit from a completion callback; the outer call
            // already holds the submit lock.
            let tran = self.register(request);
            lock(&self.shared.dispatch)
                .deferred
                .push_back((slave, tran.clone()));
            return Ok(tran);
        }

        let _submit = lock(&self.shared.submit);
        let tran = self.register(request);

        lock(&self.shared.dispatch).owner = Some(me);
        let _owner = DispatchGuard(&self.shared.dispatch);
        slave.do_transaction(tran.clone());
        loop {
            let next = lock(&self.shared.dispatch).deferred.pop_front();
            match next {
                Some((slave, deferred)) => slave.do_transaction(deferred),
                None => break,
            }
        }
        Ok(tran)
    }

    /// Allocate the next id and enter the transaction in the pending table.
    /// Caller holds the submit lock.
    fn register(&self, request: TransactionRequest) -> Arc<Transaction> {
        let timeout = request.timeout.unwrap_or_else(|| self.timeout());
        let retire = request.callback.is_some();

        let id = {
            let mut table = lock(&self.shared.table);
            let id = table.last_id.next();
            assert!(
                !table.pending.contains_key(&id),
                "transaction id {} collides with an outstanding transaction",
                id
            );
            table.last_id = id;
            id
        };

        let weak = Arc::downgrade(&self.shared);
        let mut callbacks: Vec<CompletionCallback> = vec![Box::new(move |id, code| {
            if let Some(shared) = weak.upgrade() {
                shared.on_disposed(id, code, retire);
            }
        })];
        if let Some(cb) = request.callback {
            callbacks.push(cb);
        }

        let tran = Arc::new(Transaction::new(
            id,
            request.kind,
            request.address,
            request.size,
            request.data,
            request.data_offset,
            timeout,
            callbacks,
        ));

        lock(&self.shared.table).pending.insert(id, tran.clone());

        tracing::trace!(
            target: "daqlink::memory",
            "{}: {:?} {} at 0x{:08X} size {}",
            self.shared.name,
            tran.kind(),
            id,
            tran.address(),
            tran.size()
        );
        tran
    }

    /// Block up to `timeout` for the transaction's disposition.
    ///
    /// A wait that hits its own timeout returns `Pending` and leaves the
    /// transaction in flight. Returns `None` for an unknown or retired id.
    pub fn wait_transaction(&self, id: TransactionId, timeout: Duration) -> Option<TransactionStatus> {
        let tran = lock(&self.shared.table).pending.get(&id).cloned()?;
        let status = tran.wait(timeout);
        if status == TransactionStatus::Done(0) {
            lock(&self.shared.table).pending.remove(&id);
        }
        Some(status)
    }

    /// Current error code of a transaction; 0 for success, pending or unknown ids
    pub fn get_error(&self, id: TransactionId) -> u32 {
        lock(&self.shared.table)
            .pending
            .get(&id)
            .and_then(|t| t.status().code())
            .unwrap_or(0)
    }

    /// Acknowledge a disposed transaction and drop it from the pending table
    pub fn clear_error(&self, id: TransactionId) {
        let mut table = lock(&self.shared.table);
        if table
            .pending
            .get(&id)
            .is_some_and(|t| !t.status().is_pending())
        {
            table.pending.remove(&id);
        }
    }

    /// Number of transactions in the pending table (in flight or unacknowledged)
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.table).pending.len()
    }

    /// Snapshot of the transaction statistics
    pub fn stats(&self) -> BusStats {
        lock(&self.shared.stats).clone()
    }

    pub fn reset_stats(&self) {
        lock(&self.shared.stats).reset();
    }

    /// Blocking read of `size` bytes at `address`
    pub fn read(&self, address: u64, size: u32) -> Result<Vec<u8>> {
        let data = crate::memory::data_region(size as usize);
        self.blocking(address, size, &data, TransactionKind::Read)?;
        let bytes = lock(&data).clone();
        Ok(bytes)
    }

    /// Blocking non-posted write of `bytes` at `address`
    pub fn write(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let size = u32::try_from(bytes.len())
            .map_err(|_| DaqError::boundary("Master::write", bytes.len() as u64, u32::MAX))?;
        let data: DataRegion = Arc::new(Mutex::new(bytes.to_vec()));
        self.blocking(address, size, &data, TransactionKind::Write)
    }

    fn blocking(&self, address: u64, size: u32, data: &DataRegion, kind: TransactionKind) -> Result<()> {
        let id = self.req_transaction(address, size, data, kind)?;
        // The transaction deadline bounds the wait; the extra margin covers reaper latency.
        let limit = self.timeout() + self.shared.reaper_interval * 2;
        let Some(status) = self.wait_transaction(id, limit) else {
            // Another handle acknowledged the entry before this waiter saw it
            return Err(DaqError::Code(ErrorCode::Generic).with_context(format!(
                "transaction {} at 0x{:08X} retired before its result was observed",
                id, address
            )));
        };
        match status.code() {
            None => {
                self.abandon(id);
                Err(DaqError::Timeout(format!(
                    "transaction {} at 0x{:08X} still pending",
                    id, address
                )))
            }
            Some(code) => {
                self.clear_error(id);
                match DaqError::from_code(code, address, size) {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            }
        }
    }

    /// Stop tracking a transaction nobody will wait for again. A disposed
    /// entry is dropped now; one still in flight is dropped at disposition.
    fn abandon(&self, id: TransactionId) {
        let mut table = lock(&self.shared.table);
        match table.pending.get(&id).map(|t| t.status().is_pending()) {
            Some(true) => {
                table.orphaned.insert(id);
            }
            Some(false) => {
                table.pending.remove(&id);
            }
            None => {}
        }
    }

    /// Stop the reaper and fail every pending transaction with `ErrShutdown`
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    fn ensure_reaper(&self) -> Result<()> {
        let mut reaper = lock(&self.shared.reaper);
        if reaper.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let weak: Weak<MasterShared> = Arc::downgrade(&self.shared);
        let interval = self.shared.reaper_interval;
        let handle = thread::Builder::new()
            .name(format!("{}-reaper", self.shared.name))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(shared) = weak.upgrade() else { break };
                            shared.sweep(Instant::now());
                        }
                    }
                }
                tracing::trace!(target: "daqlink::memory", "Reaper stopped");
            })?;

        *reaper = Some(Reaper { stop_tx, handle });
        Ok(())
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("name", &self.shared.name)
            .field("pending", &self.pending_count())
            .field("timeout", &self.timeout())
            .finish()
    }
}
