//! Abstract NAND transport the controller is built against. No concrete
//! (SPI, simulator) implementation ships here — only the trait and the
//! shared bad-block indicator vocabulary.

use std::sync::Arc;

use crate::error::NandResult;

/// Indicator strings a transport's error messages are checked against when
/// no structured status is available. Kept as a compatibility fallback,
/// not the primary signal — prefer `TransportStatus.error`.
const BAD_BLOCK_INDICATORS: &[&str] = &[
    "program fail",
    "status error",
    "timeout",
    "verify fail",
    "write protected",
    "erase fail",
];

/// True if `message` contains any of the known bad-block indicator phrases
/// (case-insensitive). This is a fallback for transports that only report
/// errors as strings; transports that set `TransportStatus.error` don't
/// need this path.
pub fn is_bad_block_indicator(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    BAD_BLOCK_INDICATORS.iter().any(|needle| lower.contains(needle))
}

#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    pub erase_count: u32,
    pub is_bad: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub programmed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TransportStatus {
    pub ready: bool,
    pub write_protected: bool,
    pub error: bool,
    pub stats: Option<String>,
    pub block_info: Option<BlockInfo>,
    pub page_info: Option<PageInfo>,
}

/// Raw page I/O against a physical NAND array. Implementations are assumed
/// thread-safe, or externally serialized per die by the caller.
pub trait NandTransport: Send + Sync {
    fn initialize(&self) -> NandResult<()>;
    fn shutdown(&self) -> NandResult<()>;
    fn read_page(&self, block: u32, page: u32) -> NandResult<Vec<u8>>;
    fn write_page(&self, block: u32, page: u32, data: &[u8]) -> NandResult<()>;
    fn erase_block(&self, block: u32) -> NandResult<()>;
    fn status(&self, block: Option<u32>, page: Option<u32>) -> NandResult<TransportStatus>;
}

/// Lets a transport be shared across several controllers (e.g. to reopen
/// the same backing storage after a restart) without changing `NandController`'s
/// `T: NandTransport` bound.
impl<T: NandTransport + ?Sized> NandTransport for Arc<T> {
    fn initialize(&self) -> NandResult<()> {
        (**self).initialize()
    }

    fn shutdown(&self) -> NandResult<()> {
        (**self).shutdown()
    }

    fn read_page(&self, block: u32, page: u32) -> NandResult<Vec<u8>> {
        (**self).read_page(block, page)
    }

    fn write_page(&self, block: u32, page: u32, data: &[u8]) -> NandResult<()> {
        (**self).write_page(block, page, data)
    }

    fn erase_block(&self, block: u32) -> NandResult<()> {
        (**self).erase_block(block)
    }

    fn status(&self, block: Option<u32>, page: Option<u32>) -> NandResult<TransportStatus> {
        (**self).status(block, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_indicators_case_insensitively() {
        assert!(is_bad_block_indicator("PROGRAM FAIL at block 3"));
        assert!(is_bad_block_indicator("device reported a Timeout"));
        assert!(!is_bad_block_indicator("unrelated message"));
    }
}
