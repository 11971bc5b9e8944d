//! Buffer pools
//!
//! A [`Pool`] hands out fixed-size regions and takes them back when the
//! owning [`Buffer`] drops. Returned regions go on a free list and are reused
//! before fresh memory is allocated. An optional hard cap bounds the number
//! of regions outstanding at once; what happens at the cap is chosen by
//! [`ExhaustPolicy`].
//!
//! Counters are updated under the pool lock, so at every observation
//! `allocated() - freed() == in_flight()`.

use crate::config::PoolConfig;
pub use crate::config::ExhaustPolicy;
use crate::error::{DaqError, Result};
use crate::lock::lock;
use crate::stream::buffer::Buffer;
use crate::stream::frame::Frame;
use std::sync::{Arc, Condvar, Mutex};

struct PoolState {
    free: Vec<Box<[u8]>>,
    outstanding: usize,
    allocated: u64,
    freed: u64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    pub allocated: u64,
    pub freed: u64,
    pub in_flight: usize,
    pub free: usize,
}

pub struct Pool {
    region_size: usize,
    max_buffers: usize,
    policy: ExhaustPolicy,
    max_free: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl Pool {
    pub fn new(region_size: usize, config: &PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            region_size,
            max_buffers: config.max_buffers,
            policy: config.policy,
            max_free: config.max_free,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                outstanding: 0,
                allocated: 0,
                freed: 0,
            }),
            returned: Condvar::new(),
        })
    }

    /// Pool without a cap
    pub fn unbounded(region_size: usize) -> Arc<Self> {
        Self::new(region_size, &PoolConfig::default())
    }

    #[inline]
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// Allocate a frame able to hold `payload` bytes after `head_reserve`
    /// bytes reserved at the front of the first buffer.
    ///
    /// The frame's payload starts empty. At the hard cap this blocks or fails
    /// per the pool's policy.
    pub fn alloc(self: &Arc<Self>, payload: usize, head_reserve: usize) -> Result<Frame> {
        self.alloc_with(payload, head_reserve, self.policy)
    }

    /// Like [`alloc`](Self::alloc) but never blocks
    pub fn try_alloc(self: &Arc<Self>, payload: usize, head_reserve: usize) -> Result<Frame> {
        self.alloc_with(payload, head_reserve, ExhaustPolicy::Fail)
    }

    fn alloc_with(
        self: &Arc<Self>,
        payload: usize,
        head_reserve: usize,
        policy: ExhaustPolicy,
    ) -> Result<Frame> {
        if self.region_size == 0 || head_reserve > self.region_size {
            return Err(DaqError::boundary(
                "Pool::alloc",
                head_reserve as u64,
                self.region_size as u64,
            ));
        }

        let first = self.region_size - head_reserve;
        let count = 1 + payload.saturating_sub(first).div_ceil(self.region_size);
        if self.max_buffers > 0 && count > self.max_buffers {
            return Err(DaqError::boundary(
                "Pool::alloc",
                count as u64,
                self.max_buffers as u64,
            ));
        }

        let regions = {
            let mut state = lock(&self.state);
            while self.max_buffers > 0 && state.outstanding + count > self.max_buffers {
                match policy {
                    ExhaustPolicy::Fail => {
                        return Err(DaqError::boundary(
                            "Pool::alloc",
                            (state.outstanding + count) as u64,
                            self.max_buffers as u64,
                        ));
                    }
                    ExhaustPolicy::Block => {
                        state = self
                            .returned
                            .wait(state)
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                    }
                }
            }

            let mut regions = Vec::with_capacity(count);
            for _ in 0..count {
                let region = state
                    .free
                    .pop()
                    .unwrap_or_else(|| vec![0u8; self.region_size].into_boxed_slice());
                regions.push(region);
            }
            state.outstanding += count;
            state.allocated += count as u64;
            regions
        };

        let mut frame = Frame::new();
        for (i, region) in regions.into_iter().enumerate() {
            let mut buffer = Buffer::from_pool(region, self.clone());
            if i == 0 {
                buffer.reserve_head(head_reserve)?;
            }
            frame.append_buffer(buffer);
        }
        Ok(frame)
    }

    /// Take back a region from a dropped buffer
    pub(crate) fn release(&self, region: Box<[u8]>) {
        let mut state = lock(&self.state);
        state.outstanding -= 1;
        state.freed += 1;
        if self.max_free == 0 || state.free.len() < self.max_free {
            state.free.push(region);
        }
        drop(state);
        self.returned.notify_all();
    }

    pub fn counters(&self) -> PoolCounters {
        let state = lock(&self.state);
        PoolCounters {
            allocated: state.allocated,
            freed: state.freed,
            in_flight: state.outstanding,
            free: state.free.len(),
        }
    }

    /// Regions handed out over the pool's lifetime
    pub fn allocated(&self) -> u64 {
        lock(&self.state).allocated
    }

    /// Regions returned over the pool's lifetime
    pub fn freed(&self) -> u64 {
        lock(&self.state).freed
    }

    /// Regions currently held by buffers
    pub fn in_flight(&self) -> usize {
        lock(&self.state).outstanding
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("region_size", &self.region_size)
            .field("max_buffers", &self.max_buffers)
            .field("policy", &self.policy)
            .field("counters", &self.counters())
            .finish()
    }
}

/// One pool per configured region-size class
///
/// Built once at startup and passed by reference to whatever allocates.
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    pools: Vec<Arc<Pool>>,
}

impl PoolRegistry {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let mut sizes = config.region_sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.is_empty() || sizes[0] == 0 {
            return Err(DaqError::Config(
                "pool.region_sizes must contain non-zero sizes".to_string(),
            ));
        }
        Ok(Self {
            pools: sizes.into_iter().map(|s| Pool::new(s, config)).collect(),
        })
    }

    /// Smallest pool whose regions hold `size` bytes, else the largest pool
    pub fn pool_for(&self, size: usize) -> Arc<Pool> {
        self.pools
            .iter()
            .find(|p| p.region_size() >= size)
            .or_else(|| self.pools.last())
            .cloned()
            .unwrap_or_else(|| Pool::unbounded(size.max(1)))
    }

    pub fn pools(&self) -> &[Arc<Pool>] {
        &self.pools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn capped(max_buffers: usize, policy: ExhaustPolicy) -> Arc<Pool> {
        Pool::new(
            64,
            &PoolConfig {
                region_sizes: vec![64],
                max_buffers,
                policy,
                max_free: 0,
            },
        )
    }

    #[test]
    fn test_alloc_covers_payload_and_head() {
        let pool = Pool::unbounded(64);
        let frame = pool.alloc(100, 16).unwrap();
        assert_eq!(frame.buffer_count(), 2);
        assert!(frame.capacity() >= 100);
        assert_eq!(frame.payload(), 0);
        assert_eq!(frame.head_reserved(), 16);

        let frame = pool.alloc(0, 0).unwrap();
        assert_eq!(frame.buffer_count(), 1);
    }

    #[test]
    fn test_regions_are_recycled() {
        let pool = Pool::unbounded(64);
        drop(pool.alloc(200, 0).unwrap());
        let c = pool.counters();
        assert_eq!(c.allocated, 4);
        assert_eq!(c.freed, 4);
        assert_eq!(c.in_flight, 0);
        assert_eq!(c.free, 4);

        let _frame = pool.alloc(64, 0).unwrap();
        assert_eq!(pool.counters().free, 3);
        assert_eq!(pool.allocated() - pool.freed(), pool.in_flight() as u64);
    }

    #[test]
    fn test_fail_policy_at_cap() {
        let pool = capped(2, ExhaustPolicy::Fail);
        let held = pool.alloc(128, 0).unwrap();
        assert!(pool.alloc(1, 0).is_err());
        drop(held);
        assert!(pool.alloc(1, 0).is_ok());
    }

    #[test]
    fn test_request_larger_than_cap_fails_even_when_blocking() {
        let pool = capped(2, ExhaustPolicy::Block);
        assert!(pool.alloc(64 * 3, 0).is_err());
    }

    #[test]
    fn test_block_policy_waits_for_return() {
        let pool = capped(1, ExhaustPolicy::Block);
        let held = pool.alloc(10, 0).unwrap();

        let p = pool.clone();
        let waiter = thread::spawn(move || p.alloc(10, 0).map(|f| f.buffer_count()));
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_try_alloc_never_blocks() {
        let pool = capped(1, ExhaustPolicy::Block);
        let _held = pool.alloc(10, 0).unwrap();
        assert!(pool.try_alloc(10, 0).is_err());
    }

    #[test]
    fn test_max_free_bounds_free_list() {
        let pool = Pool::new(
            32,
            &PoolConfig {
                region_sizes: vec![32],
                max_buffers: 0,
                policy: ExhaustPolicy::Block,
                max_free: 1,
            },
        );
        drop(pool.alloc(96, 0).unwrap());
        assert_eq!(pool.counters().free, 1);
        assert_eq!(pool.freed(), 3);
    }

    #[test]
    fn test_registry_picks_smallest_fit() {
        let registry = PoolRegistry::new(&PoolConfig::default()).unwrap();
        assert_eq!(registry.pool_for(100).region_size(), 2048);
        assert_eq!(registry.pool_for(4096).region_size(), 65536);
        assert_eq!(registry.pool_for(1 << 20).region_size(), 65536);
        assert_eq!(registry.pools().len(), 2);
    }
}
