//! Control plane for a 3D NAND flash storage stack.
//!
//! This crate sits between a block-device consumer and a raw NAND array,
//! turning fallible, write-once-per-erase, wear-limited cells into a
//! reliable byte-addressable surface: error correction, bad-block
//! management, wear leveling, logical-to-physical translation,
//! compression, caching, and persistent metadata, composed by
//! [`controller::NandController`] over an abstract [`transport::NandTransport`].
//!
//! A concrete hardware transport is out of scope; [`testing::MemoryTransport`]
//! is provided for tests and examples.

pub mod bad_block;
pub mod bch;
pub mod bits;
pub mod cache;
pub mod compress;
pub mod config;
pub mod controller;
pub mod ecc;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod gf;
pub mod ldpc;
pub mod metadata;
pub mod scramble;
pub mod stats;
pub mod testing;
pub mod transport;
pub mod wear_level;

pub use cache::{Cache, CacheStats, EvictionPolicy};
pub use compress::{CompressionAlgorithm, Compressor};
pub use config::{NandConfig, validate_firmware_spec};
pub use controller::{BatchOp, BatchOutcome, NandController};
pub use ecc::{EccEngine, EccKind};
pub use error::{NandError, NandResult};
pub use geometry::{AddressSpace, Geometry, PhysicalAddress, ReservedBlocks, ReservedRole};
pub use stats::DeviceInfo;
pub use transport::{NandTransport, TransportStatus};
