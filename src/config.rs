//! Serde-based configuration schema for the controller's option groups.
//! Unknown keys are ignored; missing keys default via `#[serde(default)]`
//! on every field.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::EvictionPolicy;
use crate::compress::CompressionAlgorithm;
use crate::ecc::EccKind;
use crate::error::{NandError, NandResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NandOptions {
    pub page_size: usize,
    pub pages_per_block: u32,
    pub num_blocks: u32,
    pub oob_size: usize,
    pub num_planes: u32,
}

impl Default for NandOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            pages_per_block: 64,
            num_blocks: 1024,
            oob_size: 128,
            num_planes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareOptions {
    pub firmware_version: String,
    pub read_retry: bool,
    pub max_read_retries: u32,
    pub data_scrambling: bool,
    pub scrambling_seed: u32,
}

impl Default for FirmwareOptions {
    fn default() -> Self {
        Self {
            firmware_version: "1.0.0".to_string(),
            read_retry: true,
            max_read_retries: 3,
            data_scrambling: false,
            scrambling_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EccOptions {
    pub algorithm: EccAlgorithmChoice,
    pub bch_m: u32,
    pub bch_t: u32,
    pub ldpc_n: usize,
    pub ldpc_d_v: usize,
    pub ldpc_d_c: usize,
    pub ldpc_seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EccAlgorithmChoice {
    Bch,
    Ldpc,
}

impl Default for EccOptions {
    fn default() -> Self {
        Self {
            algorithm: EccAlgorithmChoice::Bch,
            bch_m: 8,
            bch_t: 4,
            ldpc_n: 256,
            ldpc_d_v: 3,
            ldpc_d_c: 6,
            ldpc_seed: 0,
        }
    }
}

impl EccOptions {
    pub fn to_kind(&self) -> EccKind {
        match self.algorithm {
            EccAlgorithmChoice::Bch => EccKind::Bch {
                m: self.bch_m,
                t: self.bch_t,
            },
            EccAlgorithmChoice::Ldpc => EccKind::Ldpc {
                n: self.ldpc_n,
                d_v: self.ldpc_d_v,
                d_c: self.ldpc_d_c,
                seed: self.ldpc_seed,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithm,
    pub level: i32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: CompressionAlgorithm::Deflate,
            level: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub enabled: bool,
    pub capacity: usize,
    pub policy: EvictionPolicy,
    pub ttl_seconds: Option<u64>,
    pub max_size_bytes: Option<usize>,
}

impl CacheOptions {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            policy: EvictionPolicy::Lru,
            ttl_seconds: None,
            max_size_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelismOptions {
    pub max_workers: usize,
}

impl Default for ParallelismOptions {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

/// Wear-leveling option carried alongside the others; the controller reads
/// `wear_level_threshold` to build its `WearLevelTable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WearLevelOptions {
    pub threshold: u32,
}

impl Default for WearLevelOptions {
    fn default() -> Self {
        Self { threshold: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NandConfig {
    pub nand: NandOptions,
    pub firmware: FirmwareOptions,
    pub ecc: EccOptions,
    pub compression: CompressionOptions,
    pub cache: CacheOptions,
    pub parallelism: ParallelismOptions,
    pub wear_level: WearLevelOptions,
}

/// Checks the semantic invariants a firmware spec must satisfy before a
/// controller is built against it.
pub fn validate_firmware_spec(config: &NandConfig) -> NandResult<()> {
    if !is_semver(&config.firmware.firmware_version) {
        return Err(NandError::OutOfRange(format!(
            "firmware_version '{}' is not a semantic version",
            config.firmware.firmware_version
        )));
    }

    let block_size_bytes = config.nand.page_size * config.nand.pages_per_block as usize;
    if block_size_bytes % config.nand.page_size != 0 {
        return Err(NandError::OutOfRange(
            "block_size_bytes must be a multiple of page_size".to_string(),
        ));
    }

    if config.ecc.algorithm == EccAlgorithmChoice::Bch {
        let max_t = (1u32 << (config.ecc.bch_m.saturating_sub(1))).saturating_sub(1);
        if config.ecc.bch_t > max_t {
            return Err(NandError::OutOfRange(format!(
                "BCH t={} exceeds 2^(m-1)-1={max_t}",
                config.ecc.bch_t
            )));
        }
    }

    if config.ecc.algorithm == EccAlgorithmChoice::Ldpc
        && (config.ecc.ldpc_n * config.ecc.ldpc_d_v) % config.ecc.ldpc_d_c != 0
    {
        return Err(NandError::OutOfRange(
            "LDPC n*d_v must be a multiple of d_c".to_string(),
        ));
    }

    let max_threshold = 100u64 * config.nand.num_blocks as u64;
    if config.wear_level.threshold as u64 > max_threshold {
        return Err(NandError::OutOfRange(format!(
            "wear_level_threshold {} exceeds 100*num_blocks {max_threshold}",
            config.wear_level.threshold
        )));
    }

    Ok(())
}

/// Checks `^\d+\.\d+\.\d+$` without pulling in a regex engine for a single
/// fixed pattern.
fn is_semver(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}
