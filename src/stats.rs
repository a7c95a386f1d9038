//! Operation counters and device-wide diagnostics.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::bad_block::BadBlockTable;
use crate::geometry::Geometry;
use crate::transport::TransportStatus;
use crate::wear_level::WearLevelTable;

#[derive(Debug, Default)]
struct Counters {
    reads: u64,
    writes: u64,
    erases: u64,
    cache_hits: u64,
    cache_misses: u64,
    ecc_corrections: u64,
    compression_ratio_sum: f64,
    compression_samples: u64,
}

/// Operation counters guarded by a short-critical-section mutex: the lock
/// is held only to increment a counter, never across a transport call.
pub struct Statistics {
    counters: Mutex<Counters>,
    start_time: Instant,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            start_time: Instant::now(),
        }
    }

    pub fn record_read(&self) {
        self.counters.lock().unwrap().reads += 1;
    }

    pub fn record_write(&self) {
        self.counters.lock().unwrap().writes += 1;
    }

    pub fn record_erase(&self) {
        self.counters.lock().unwrap().erases += 1;
    }

    pub fn record_cache_hit(&self) {
        self.counters.lock().unwrap().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.counters.lock().unwrap().cache_misses += 1;
    }

    pub fn record_ecc_corrections(&self, bit_flips: usize) {
        if bit_flips > 0 {
            self.counters.lock().unwrap().ecc_corrections += bit_flips as u64;
        }
    }

    pub fn record_compression_ratio(&self, original_len: usize, compressed_len: usize) {
        if original_len == 0 {
            return;
        }
        let ratio = compressed_len as f64 / original_len as f64;
        let mut counters = self.counters.lock().unwrap();
        counters.compression_ratio_sum += ratio;
        counters.compression_samples += 1;
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let counters = self.counters.lock().unwrap();
        let mean_compression_ratio = if counters.compression_samples > 0 {
            counters.compression_ratio_sum / counters.compression_samples as f64
        } else {
            1.0
        };
        StatisticsSnapshot {
            reads: counters.reads,
            writes: counters.writes,
            erases: counters.erases,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            ecc_corrections: counters.ecc_corrections,
            mean_compression_ratio,
            uptime_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub erases: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub ecc_corrections: u64,
    pub mean_compression_ratio: f64,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WearSummary {
    pub min: u32,
    pub max: u32,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub geometry: Geometry,
    pub firmware_version: String,
    pub transport_ready: bool,
    pub bad_block_count: usize,
    pub bad_block_percentage: f64,
    pub wear: WearSummary,
    pub statistics: StatisticsSnapshot,
}

impl DeviceInfo {
    pub fn assemble(
        geometry: Geometry,
        firmware_version: String,
        transport_status: &TransportStatus,
        bad_blocks: &BadBlockTable,
        wear: &WearLevelTable,
        statistics: &Statistics,
    ) -> Self {
        let bad_block_count = bad_blocks.bad_count();
        let num_blocks = bad_blocks.num_blocks().max(1);
        let counts: Vec<u32> = (0..wear.num_blocks())
            .map(|b| wear.erase_count(b).unwrap_or(0))
            .collect();
        let wear_summary = wear_summary(&counts);

        Self {
            geometry,
            firmware_version,
            transport_ready: transport_status.ready,
            bad_block_count,
            bad_block_percentage: 100.0 * bad_block_count as f64 / num_blocks as f64,
            wear: wear_summary,
            statistics: statistics.snapshot(),
        }
    }
}

fn wear_summary(counts: &[u32]) -> WearSummary {
    if counts.is_empty() {
        return WearSummary {
            min: 0,
            max: 0,
            mean: 0.0,
            stddev: 0.0,
        };
    }
    let min = *counts.iter().min().unwrap();
    let max = *counts.iter().max().unwrap();
    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / counts.len() as f64;
    let variance = counts
        .iter()
        .map(|&c| {
            let diff = c as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / counts.len() as f64;
    WearSummary {
        min,
        max,
        mean,
        stddev: variance.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let stats = Statistics::new();
        stats.record_read();
        stats.record_read();
        stats.record_write();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reads, 2);
        assert_eq!(snapshot.writes, 1);
    }

    #[test]
    fn compression_ratio_is_averaged_across_samples() {
        let stats = Statistics::new();
        stats.record_compression_ratio(100, 50);
        stats.record_compression_ratio(100, 100);
        let snapshot = stats.snapshot();
        assert!((snapshot.mean_compression_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn wear_summary_on_uniform_counts_has_zero_stddev() {
        let summary = wear_summary(&[5, 5, 5, 5]);
        assert_eq!(summary.min, 5);
        assert_eq!(summary.max, 5);
        assert_eq!(summary.stddev, 0.0);
    }
}
