//! Mock construction helpers

use daqlink::memory::{MemorySlave, Transaction};
use daqlink::stream::{Frame, StreamSlave};
use mockall::mock;
use std::sync::{Arc, Mutex};

mock! {
    pub Slave {}

    impl MemorySlave for Slave {
        fn min_access(&self) -> u32;
        fn max_access(&self) -> u32;
        fn address(&self) -> u64;
        fn do_transaction(&self, transaction: Arc<Transaction>);
    }
}

mock! {
    pub Sink {}

    impl StreamSlave for Sink {
        fn accept_frame(&self, frame: Arc<Frame>);
    }
}

/// Slave that holds on to every transaction without completing it
#[derive(Default)]
pub struct CaptureSlave {
    captured: Mutex<Vec<Arc<Transaction>>>,
}

impl CaptureSlave {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn captured(&self) -> Vec<Arc<Transaction>> {
        self.captured.lock().unwrap().clone()
    }
}

impl MemorySlave for CaptureSlave {
    fn do_transaction(&self, transaction: Arc<Transaction>) {
        self.captured.lock().unwrap().push(transaction);
    }
}

/// Mock terminal with fixed access limits and address that completes every
/// transaction with `code`
pub fn completing_slave(min_access: u32, max_access: u32, address: u64, code: u32) -> MockSlave {
    let mut slave = MockSlave::new();
    slave.expect_min_access().return_const(min_access);
    slave.expect_max_access().return_const(max_access);
    slave.expect_address().return_const(address);
    slave
        .expect_do_transaction()
        .returning(move |transaction| transaction.done(code));
    slave
}
