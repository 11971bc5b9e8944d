//! Test data builders for pipelines and frames

use daqlink::memory::{Hub, MemorySlave};
use daqlink::stream::{Buffer, Frame};
use std::sync::Arc;

/// Builder for a chain of translating hubs ending in a terminal
pub struct HubChainBuilder {
    hubs: Vec<Arc<Hub>>,
}

impl HubChainBuilder {
    pub fn new() -> Self {
        Self { hubs: Vec::new() }
    }

    /// Append a plain hub with `offset`
    pub fn hub(mut self, offset: u64) -> Self {
        self.hubs.push(Arc::new(Hub::new(offset)));
        self
    }

    /// Append a hub with explicit access limits
    pub fn hub_with_limits(mut self, offset: u64, min_access: u32, max_access: u32) -> Self {
        self.hubs
            .push(Arc::new(Hub::with_limits(offset, min_access, max_access)));
        self
    }

    /// Wire every hub to the next and the last one to `terminal`.
    /// Returns the hubs, upstream first.
    pub fn build(self, terminal: Arc<dyn MemorySlave>) -> Vec<Arc<Hub>> {
        let mut downstream = terminal;
        for hub in self.hubs.iter().rev() {
            let next = hub.clone() as Arc<dyn MemorySlave>;
            hub.set_slave(std::mem::replace(&mut downstream, next));
        }
        self.hubs
    }
}

impl Default for HubChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame over detached buffers of `sizes` bytes each, payload set to `bytes`
pub fn frame_over(sizes: &[usize], bytes: &[u8]) -> Frame {
    let buffers = sizes.iter().map(|&s| Buffer::detached(s)).collect();
    let mut frame = Frame::from_buffers(buffers);
    frame.write(0, bytes).unwrap();
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqlink::memory::Emulate;

    #[test]
    fn test_hub_chain_builder() {
        let hubs = HubChainBuilder::new()
            .hub(0x100)
            .hub(0x10)
            .build(Arc::new(Emulate::new(1, 0)));
        assert_eq!(hubs.len(), 2);
        assert_eq!(hubs[0].address(), 0x110);
    }
}
