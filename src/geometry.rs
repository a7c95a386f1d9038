//! NAND array geometry and address spaces.
//!
//! A [`Geometry`] is fixed at controller construction. It defines the
//! physical address space (block, page) and, together with the reserved
//! block map, the logical address space the caller sees.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{NandError, NandResult};

/// Fixed geometry constants for a NAND array.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geometry {
    pub page_size: usize,
    pub pages_per_block: u32,
    pub num_blocks: u32,
    pub oob_size: usize,
    pub num_planes: u32,
}

impl Geometry {
    /// `block_size_bytes = page_size * pages_per_block`. Honors the explicit
    /// `pages_per_block` field rather than guessing at a "block size" some
    /// source material conflates with it.
    pub fn block_size_bytes(&self) -> usize {
        self.page_size * self.pages_per_block as usize
    }
}

/// The physical (block, page) pair. Valid when `block < num_blocks` and
/// `page < pages_per_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalAddress {
    pub block: u32,
    pub page: u32,
}

impl PhysicalAddress {
    pub fn new(block: u32, page: u32) -> Self {
        Self { block, page }
    }
}

/// A role a reserved block plays in the controller's own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservedRole {
    Metadata,
    BadBlockTable,
    WearLeveling,
    Firmware,
    Log,
}

/// Maps reserved-block roles to physical block numbers. These blocks are
/// removed from the user address space and never targeted by logical
/// operations.
#[derive(Debug, Clone)]
pub struct ReservedBlocks {
    map: HashMap<ReservedRole, u32>,
}

impl Default for ReservedBlocks {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(ReservedRole::Metadata, 0);
        map.insert(ReservedRole::BadBlockTable, 1);
        map.insert(ReservedRole::WearLeveling, 2);
        map.insert(ReservedRole::Firmware, 3);
        map.insert(ReservedRole::Log, 4);
        Self { map }
    }
}

impl ReservedBlocks {
    pub fn new(map: HashMap<ReservedRole, u32>) -> Self {
        Self { map }
    }

    pub fn block_for(&self, role: ReservedRole) -> u32 {
        self.map[&role]
    }

    pub fn len(&self) -> u32 {
        self.map.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_physical(&self, block: u32) -> bool {
        self.map.values().any(|&b| b == block)
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.map.values().copied()
    }
}

/// Translates between the logical address space (user-visible, excludes
/// reserved blocks) and the physical address space.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    geometry: Geometry,
    reserved: ReservedBlocks,
}

impl AddressSpace {
    pub fn new(geometry: Geometry, reserved: ReservedBlocks) -> Self {
        Self { geometry, reserved }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn reserved(&self) -> &ReservedBlocks {
        &self.reserved
    }

    /// Number of blocks available to the logical (user) address space.
    pub fn user_blocks(&self) -> u32 {
        self.geometry.num_blocks - self.reserved.len()
    }

    /// Raw logical-block -> physical-block mapping, before bad-block
    /// substitution. Fails with `OutOfRange` if `logical_block` is not a
    /// valid user block.
    pub fn logical_to_physical_block(&self, logical_block: u32) -> NandResult<u32> {
        if logical_block >= self.user_blocks() {
            return Err(NandError::OutOfRange(format!(
                "logical block {logical_block} >= user_blocks {}",
                self.user_blocks()
            )));
        }
        Ok(logical_block + self.reserved.len())
    }

    /// Validates a physical (block, page) pair against the full physical
    /// address space (used for direct reserved-block I/O).
    pub fn validate_physical(&self, addr: PhysicalAddress) -> NandResult<()> {
        if addr.block >= self.geometry.num_blocks {
            return Err(NandError::OutOfRange(format!(
                "block {} >= num_blocks {}",
                addr.block, self.geometry.num_blocks
            )));
        }
        if addr.page >= self.geometry.pages_per_block {
            return Err(NandError::OutOfRange(format!(
                "page {} >= pages_per_block {}",
                addr.page, self.geometry.pages_per_block
            )));
        }
        Ok(())
    }
}
