//! In-memory [`NandTransport`] used by this crate's own test suite. Not
//! part of the public surface consumed by real deployments: a physical or
//! simulated hardware transport is out of scope.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{NandError, NandResult};
use crate::geometry::Geometry;
use crate::transport::{NandTransport, TransportStatus};

#[derive(Debug, Clone, Default)]
pub struct FaultInjection {
    /// (block, page) pairs that fail every read/write until cleared.
    pub forced_errors: HashSet<(u32, u32)>,
    /// Blocks that fail every erase until cleared.
    pub forced_erase_errors: HashSet<u32>,
    /// Fraction of bytes to flip on read, in `[0, 1]`.
    pub corruption_rate: f64,
    corruption_state: u64,
    /// Remaining reads, per (block, page), that should come back corrupted
    /// past any ECC's correction capacity, to exercise the retry path
    /// deterministically rather than via `corruption_rate`.
    uncorrectable_once: HashMap<(u32, u32), u32>,
}

struct Inner {
    pages: HashMap<(u32, u32), Vec<u8>>,
    faults: FaultInjection,
    initialized: bool,
}

/// An in-memory stand-in for a physical NAND array, with optional fault
/// injection so the retry and bad-block-marking paths are exercisable
/// without real hardware.
pub struct MemoryTransport {
    geometry: Geometry,
    inner: Mutex<Inner>,
}

impl MemoryTransport {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            inner: Mutex::new(Inner {
                pages: HashMap::new(),
                faults: FaultInjection::default(),
                initialized: false,
            }),
        }
    }

    pub fn inject_page_fault(&self, block: u32, page: u32) {
        self.inner
            .lock()
            .unwrap()
            .faults
            .forced_errors
            .insert((block, page));
    }

    pub fn clear_page_fault(&self, block: u32, page: u32) {
        self.inner
            .lock()
            .unwrap()
            .faults
            .forced_errors
            .remove(&(block, page));
    }

    pub fn inject_erase_fault(&self, block: u32) {
        self.inner.lock().unwrap().faults.forced_erase_errors.insert(block);
    }

    pub fn set_corruption_rate(&self, rate: f64) {
        self.inner.lock().unwrap().faults.corruption_rate = rate.clamp(0.0, 1.0);
    }

    /// Makes the next `times` reads of `(block, page)` come back corrupted
    /// beyond any reasonable ECC's correction capacity, then resume
    /// returning the true stored contents.
    pub fn fail_next_reads_uncorrectably(&self, block: u32, page: u32, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .faults
            .uncorrectable_once
            .insert((block, page), times);
    }

    fn next_corruption_value(state: &mut u64) -> f64 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((*state >> 33) as f64) / (u32::MAX as f64)
    }
}

impl NandTransport for MemoryTransport {
    fn initialize(&self) -> NandResult<()> {
        self.inner.lock().unwrap().initialized = true;
        Ok(())
    }

    fn shutdown(&self) -> NandResult<()> {
        self.inner.lock().unwrap().initialized = false;
        Ok(())
    }

    fn read_page(&self, block: u32, page: u32) -> NandResult<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.forced_errors.contains(&(block, page)) {
            return Err(NandError::Transport("status error: forced read fault".to_string()));
        }
        let mut data = inner
            .pages
            .get(&(block, page))
            .cloned()
            .unwrap_or_else(|| vec![0u8; self.geometry.page_size]);

        if let Some(remaining) = inner.faults.uncorrectable_once.get_mut(&(block, page)) {
            if *remaining > 0 {
                *remaining -= 1;
                for byte in data.iter_mut() {
                    *byte ^= 0xFF;
                }
                return Ok(data);
            }
        }

        let rate = inner.faults.corruption_rate;
        if rate > 0.0 {
            let mut state = inner.faults.corruption_state.wrapping_add(1).max(1);
            for byte in data.iter_mut() {
                if Self::next_corruption_value(&mut state) < rate {
                    *byte ^= 0x01;
                }
            }
            inner.faults.corruption_state = state;
        }
        Ok(data)
    }

    fn write_page(&self, block: u32, page: u32, data: &[u8]) -> NandResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.forced_errors.contains(&(block, page)) {
            return Err(NandError::Transport("program fail: forced write fault".to_string()));
        }
        inner.pages.insert((block, page), data.to_vec());
        Ok(())
    }

    fn erase_block(&self, block: u32) -> NandResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.forced_erase_errors.contains(&block) {
            return Err(NandError::Transport("erase fail: forced erase fault".to_string()));
        }
        let pages_per_block = self.geometry.pages_per_block;
        for page in 0..pages_per_block {
            inner.pages.remove(&(block, page));
        }
        Ok(())
    }

    fn status(&self, _block: Option<u32>, _page: Option<u32>) -> NandResult<TransportStatus> {
        let inner = self.inner.lock().unwrap();
        Ok(TransportStatus {
            ready: inner.initialized,
            write_protected: false,
            error: false,
            stats: None,
            block_info: None,
            page_info: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        transport.write_page(2, 1, &[0xAB; 64]).unwrap();
        assert_eq!(transport.read_page(2, 1).unwrap(), vec![0xAB; 64]);
    }

    #[test]
    fn erase_clears_every_page_in_block() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        transport.write_page(2, 1, &[0xAB; 64]).unwrap();
        transport.erase_block(2).unwrap();
        assert_eq!(transport.read_page(2, 1).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn injected_fault_fails_until_cleared() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        transport.inject_page_fault(0, 0);
        assert!(transport.read_page(0, 0).is_err());
        transport.clear_page_fault(0, 0);
        assert!(transport.read_page(0, 0).is_ok());
    }
}
