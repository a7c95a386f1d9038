//! Per-block erase-count tracking and threshold-triggered rebalancing.

use serde::{Deserialize, Serialize};

use crate::error::{NandError, NandResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WearLevelTable {
    erase_counts: Vec<u32>,
    /// Trigger a rebalance once the gap between the most- and least-worn
    /// blocks exceeds this many erase cycles.
    pub threshold: u32,
}

/// A recommendation to swap the logical contents of two physical blocks so
/// erase cycles spread out more evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRecommendation {
    pub worn_block: u32,
    pub fresh_block: u32,
}

impl WearLevelTable {
    pub fn new(num_blocks: u32, threshold: u32) -> Self {
        Self {
            erase_counts: vec![0; num_blocks as usize],
            threshold,
        }
    }

    pub fn num_blocks(&self) -> u32 {
        self.erase_counts.len() as u32
    }

    fn check_range(&self, block: u32) -> NandResult<()> {
        if block >= self.num_blocks() {
            return Err(NandError::OutOfRange(format!(
                "block {block} >= num_blocks {}",
                self.num_blocks()
            )));
        }
        Ok(())
    }

    pub fn erase_count(&self, block: u32) -> NandResult<u32> {
        self.check_range(block)?;
        Ok(self.erase_counts[block as usize])
    }

    pub fn record_erase(&mut self, block: u32) -> NandResult<()> {
        self.check_range(block)?;
        self.erase_counts[block as usize] += 1;
        Ok(())
    }

    /// Swaps the erase counters of two blocks, e.g. after copying a worn
    /// block's contents onto a fresh one during rebalancing.
    pub fn swap_counts(&mut self, a: u32, b: u32) -> NandResult<()> {
        self.check_range(a)?;
        self.check_range(b)?;
        self.erase_counts.swap(a as usize, b as usize);
        Ok(())
    }

    /// The block with the fewest erase cycles, excluding any in `skip`.
    pub fn least_worn(&self, skip: &[u32]) -> Option<u32> {
        self.erase_counts
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip.contains(&(*i as u32)))
            .min_by_key(|(_, &count)| count)
            .map(|(i, _)| i as u32)
    }

    /// The block with the most erase cycles, excluding any in `skip`.
    pub fn most_worn(&self, skip: &[u32]) -> Option<u32> {
        self.erase_counts
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip.contains(&(*i as u32)))
            .max_by_key(|(_, &count)| count)
            .map(|(i, _)| i as u32)
    }

    pub fn should_level(&self) -> bool {
        match (self.most_worn(&[]), self.least_worn(&[])) {
            (Some(most), Some(least)) => {
                let most_count = self.erase_counts[most as usize];
                let least_count = self.erase_counts[least as usize];
                most_count.saturating_sub(least_count) > self.threshold
            }
            _ => false,
        }
    }

    /// Recommends swapping the most-worn block with the least-worn block,
    /// if the gap between them exceeds `threshold`.
    pub fn recommend_swap(&self) -> Option<SwapRecommendation> {
        if !self.should_level() {
            return None;
        }
        let worn_block = self.most_worn(&[])?;
        let fresh_block = self.least_worn(&[worn_block])?;
        Some(SwapRecommendation {
            worn_block,
            fresh_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_zero_erase_counts() {
        let table = WearLevelTable::new(8, 100);
        assert_eq!(table.erase_count(0).unwrap(), 0);
    }

    #[test]
    fn record_erase_increments_count() {
        let mut table = WearLevelTable::new(8, 100);
        table.record_erase(2).unwrap();
        table.record_erase(2).unwrap();
        assert_eq!(table.erase_count(2).unwrap(), 2);
    }

    #[test]
    fn should_level_triggers_past_threshold() {
        let mut table = WearLevelTable::new(4, 5);
        for _ in 0..10 {
            table.record_erase(0).unwrap();
        }
        assert!(table.should_level());
        let rec = table.recommend_swap().unwrap();
        assert_eq!(rec.worn_block, 0);
        assert_ne!(rec.fresh_block, 0);
    }

    #[test]
    fn should_level_false_when_balanced() {
        let mut table = WearLevelTable::new(4, 5);
        for block in 0..4 {
            table.record_erase(block).unwrap();
        }
        assert!(!table.should_level());
        assert!(table.recommend_swap().is_none());
    }
}
