//! Shared scaffolding for the integration suite: a small tiny-geometry
//! config and transport pair, plus a bit-flip helper for ECC round-trip
//! tests.

use nand_controller::{Geometry, NandConfig};

/// Routes the controller's `tracing` output through the test harness's
/// captured writer. `try_init` rather than `init`: cargo runs every test in
/// one process, so a second call must not panic on the global subscriber
/// already being set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn tiny_geometry() -> Geometry {
    Geometry {
        page_size: 64,
        pages_per_block: 4,
        num_blocks: 16,
        oob_size: 8,
        num_planes: 1,
    }
}

pub fn tiny_config() -> NandConfig {
    let mut config = NandConfig::default();
    config.nand.page_size = 64;
    config.nand.pages_per_block = 4;
    config.nand.num_blocks = 16;
    config.cache.capacity = 8;
    config.ecc.bch_m = 6;
    config.ecc.bch_t = 2;
    config.parallelism.max_workers = 2;
    config.wear_level.threshold = 1000;
    config
}

pub fn flip_bits(bytes: &mut [u8], positions: &[usize]) {
    for &pos in positions {
        bytes[pos / 8] ^= 1 << (7 - (pos % 8));
    }
}
