//! Persistent bad-block bitmap and successor search.

use serde::{Deserialize, Serialize};

use crate::error::{NandError, NandResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadBlockTable {
    bad: Vec<bool>,
}

impl BadBlockTable {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            bad: vec![false; num_blocks as usize],
        }
    }

    pub fn num_blocks(&self) -> u32 {
        self.bad.len() as u32
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

    pub fn mark_bad(&mut self, block: u32) -> NandResult<()> {
        self.check_range(block)?;
        self.bad[block as usize] = true;
        Ok(())
    }

    pub fn is_bad(&self, block: u32) -> NandResult<bool> {
        self.check_range(block)?;
        Ok(self.bad[block as usize])
    }

    pub fn bad_count(&self) -> usize {
        self.bad.iter().filter(|&&b| b).count()
    }

    /// Finds the next good block at or after `start`, wrapping around the
    /// array once. Fails with `NoGoodBlocks` if every block is bad.
    pub fn next_good(&self, start: u32) -> NandResult<u32> {
        self.check_range(start)?;
        let n = self.num_blocks();
        for offset in 0..n {
            let candidate = (start + offset) % n;
            if !self.bad[candidate as usize] {
                return Ok(candidate);
            }
        }
        Err(NandError::NoGoodBlocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_no_bad_blocks() {
        let table = BadBlockTable::new(16);
        assert_eq!(table.bad_count(), 0);
    }

    #[test]
    fn mark_bad_is_reflected_in_is_bad() {
        let mut table = BadBlockTable::new(16);
        table.mark_bad(3).unwrap();
        assert!(table.is_bad(3).unwrap());
        assert!(!table.is_bad(4).unwrap());
    }

    #[test]
    fn next_good_skips_bad_blocks_and_wraps() {
        let mut table = BadBlockTable::new(4);
        table.mark_bad(0).unwrap();
        table.mark_bad(1).unwrap();
        table.mark_bad(3).unwrap();
        assert_eq!(table.next_good(3).unwrap(), 2);
    }

    #[test]
    fn next_good_errors_when_all_blocks_bad() {
        let mut table = BadBlockTable::new(2);
        table.mark_bad(0).unwrap();
        table.mark_bad(1).unwrap();
        assert!(matches!(table.next_good(0), Err(NandError::NoGoodBlocks)));
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let table = BadBlockTable::new(4);
        assert!(matches!(
            table.is_bad(10),
            Err(NandError::OutOfRange(_))
        ));
    }
}
