//! Composes the codec, bad-block manager, wear-leveling engine, cache,
//! compressor, and metadata store into the read/write/erase pipelines.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::bad_block::BadBlockTable;
use crate::cache::Cache;
use crate::compress::Compressor;
use crate::config::NandConfig;
use crate::ecc::EccEngine;
use crate::error::{NandError, NandResult};
use crate::executor::{JobHandle, ParallelExecutor};
use crate::geometry::{AddressSpace, Geometry, ReservedBlocks, ReservedRole};
use crate::metadata::{json_record, MetadataStore, UserMetadataRecord};
use crate::scramble::scramble;
use crate::stats::{DeviceInfo, Statistics};
use crate::transport::{is_bad_block_indicator, NandTransport};
use crate::wear_level::WearLevelTable;
use serde::{Deserialize, Serialize};

type CacheKey = (u32, u32);

/// A single batched page operation submitted to [`NandController::execute_parallel`].
pub enum BatchOp {
    Read { block: u32, page: u32 },
    Write { block: u32, page: u32, data: Vec<u8> },
    Erase { block: u32 },
}

pub struct BatchOutcome {
    pub index: usize,
    pub result: NandResult<Option<Vec<u8>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    file_name: String,
    file_size: u64,
    pages_used: u32,
    written_at_unix_secs: u64,
}

/// State shared behind one `Arc` so batched operations can be handed to the
/// executor's worker threads without borrowing from the controller.
struct Inner<T: NandTransport> {
    transport: T,
    address_space: AddressSpace,
    ecc: EccEngine,
    compressor: Option<Compressor>,
    cache: Option<Cache<CacheKey, Vec<u8>>>,
    stats: Statistics,
    bad_blocks: RwLock<BadBlockTable>,
    wear: RwLock<WearLevelTable>,
    config: NandConfig,
}

impl<T: NandTransport> Inner<T> {
    fn geometry(&self) -> &Geometry {
        self.address_space.geometry()
    }

    /// Maps a logical block to its physical block. Does not skip bad
    /// blocks — that is the job of the `reject if bad` pipeline step that
    /// follows every call site, so a write against a known-bad block fails
    /// loudly with `BadBlock` rather than silently landing elsewhere.
    fn translate(&self, logical_block: u32) -> NandResult<u32> {
        self.address_space.logical_to_physical_block(logical_block)
    }

    fn reject_if_bad(&self, physical: u32) -> NandResult<()> {
        if self.bad_blocks.read().unwrap().is_bad(physical)? {
            return Err(NandError::BadBlock { block: physical });
        }
        Ok(())
    }

    fn mark_bad_from_transport_error(&self, physical: u32, err: &NandError) {
        let indicates_bad_block = match err {
            NandError::Transport(message) => is_bad_block_indicator(message),
            _ => false,
        };
        if indicates_bad_block {
            if let Err(mark_err) = self.bad_blocks.write().unwrap().mark_bad(physical) {
                warn!(block = physical, error = ?mark_err, "failed to mark block bad");
            } else {
                warn!(block = physical, "marked block bad after transport error");
            }
        }
    }

    /// Read pipeline: cache lookup, raw read with retry, descramble, ECC
    /// decode, optional decompress, cache insert.
    fn read_page(&self, logical_block: u32, page: u32) -> NandResult<Vec<u8>> {
        self.stats.record_read();
        let physical = self.translate(logical_block)?;
        self.reject_if_bad(physical)?;

        let key = (physical, page);
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(&key) {
                self.stats.record_cache_hit();
                return Ok(value);
            }
            self.stats.record_cache_miss();
        }

        let max_attempts = if self.config.firmware.read_retry {
            self.config.firmware.max_read_retries.max(1)
        } else {
            1
        };

        let mut last_err = None;
        for attempt in 0..max_attempts {
            match self.read_once(physical, page) {
                Ok((payload, bit_flips)) => {
                    self.stats.record_ecc_corrections(bit_flips);
                    if let Some(cache) = &self.cache {
                        cache.put(key, payload.clone(), None);
                    }
                    return Ok(payload);
                }
                // spec.md §7 kind (2): uncorrectable ECC, transport, and
                // timeout errors are all subject to the read-retry budget.
                Err(e @ NandError::Uncorrectable)
                | Err(e @ NandError::Transport(_))
                | Err(e @ NandError::Timeout) => {
                    last_err = Some(e);
                    debug!(physical, page, attempt, "retrying read after transient error");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(NandError::Uncorrectable))
    }

    fn read_once(&self, physical: u32, page: u32) -> NandResult<(Vec<u8>, usize)> {
        let mut raw = self.transport.read_page(physical, page)?;
        if self.config.firmware.data_scrambling {
            scramble(&mut raw, self.config.firmware.scrambling_seed, physical, page);
        }
        let decoded = self.ecc.decode(&raw)?;
        let payload = match &self.compressor {
            Some(compressor) => match compressor.decompress(&decoded.data) {
                Ok(data) => data,
                Err(_) => decoded.data,
            },
            None => decoded.data,
        };
        Ok((payload, decoded.bit_flips))
    }

    /// Write pipeline: optional compress, ECC encode, optional scramble,
    /// raw write with bad-block detection, wear update, conditional
    /// rebalance, cache invalidate+reinsert.
    fn write_page(&self, logical_block: u32, page: u32, data: &[u8]) -> NandResult<()> {
        self.stats.record_write();
        let physical = self.translate(logical_block)?;
        self.reject_if_bad(physical)?;

        let to_encode = match &self.compressor {
            Some(compressor) => {
                let compressed = compressor.compress(data)?;
                self.stats.record_compression_ratio(data.len(), compressed.len());
                if compressed.len() < data.len() {
                    compressed
                } else {
                    data.to_vec()
                }
            }
            None => data.to_vec(),
        };

        let mut encoded = self.ecc.encode(&to_encode)?;
        if self.config.firmware.data_scrambling {
            scramble(&mut encoded, self.config.firmware.scrambling_seed, physical, page);
        }

        let key = (physical, page);
        if let Some(cache) = &self.cache {
            cache.invalidate(&key);
        }

        if let Err(err) = self.transport.write_page(physical, page, &encoded) {
            self.mark_bad_from_transport_error(physical, &err);
            return Err(err);
        }

        self.wear.write().unwrap().record_erase(physical).ok();
        self.maybe_rebalance(physical)?;

        if let Some(cache) = &self.cache {
            cache.put(key, data.to_vec(), None);
        }
        Ok(())
    }

    /// Erase pipeline: mirrors write, invalidating every page's cache entry
    /// on success only.
    fn erase_block(&self, logical_block: u32) -> NandResult<()> {
        self.stats.record_erase();
        let physical = self.translate(logical_block)?;
        self.reject_if_bad(physical)?;

        if let Err(err) = self.transport.erase_block(physical) {
            self.mark_bad_from_transport_error(physical, &err);
            return Err(err);
        }

        self.wear.write().unwrap().record_erase(physical).ok();
        self.maybe_rebalance(physical)?;

        if let Some(cache) = &self.cache {
            for page in 0..self.geometry().pages_per_block {
                cache.invalidate(&(physical, page));
            }
        }
        Ok(())
    }

    fn maybe_rebalance(&self, just_written: u32) -> NandResult<()> {
        let should_level = self.wear.read().unwrap().should_level();
        if !should_level {
            return Ok(());
        }
        let recommendation = self.wear.read().unwrap().recommend_swap();
        let Some(recommendation) = recommendation else {
            return Ok(());
        };
        if self.address_space.reserved().contains_physical(recommendation.worn_block)
            || self.address_space.reserved().contains_physical(recommendation.fresh_block)
        {
            return Ok(());
        }
        match self.rebalance(recommendation.worn_block, recommendation.fresh_block) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(source = recommendation.worn_block, destination = recommendation.fresh_block, error = ?e, just_written, "rebalance failed, leaving data in place");
                Ok(())
            }
        }
    }

    fn rebalance(&self, source: u32, destination: u32) -> NandResult<()> {
        self.transport.erase_block(destination)?;
        for page in 0..self.geometry().pages_per_block {
            let data = self.transport.read_page(source, page)?;
            self.transport.write_page(destination, page, &data)?;
        }
        self.wear.write().unwrap().swap_counts(source, destination)?;
        Ok(())
    }

    fn device_info(&self) -> NandResult<DeviceInfo> {
        let status = self.transport.status(None, None)?;
        Ok(DeviceInfo::assemble(
            *self.geometry(),
            self.config.firmware.firmware_version.clone(),
            &status,
            &self.bad_blocks.read().unwrap(),
            &self.wear.read().unwrap(),
            &self.stats,
        ))
    }

    fn is_bad_physical_block(&self, physical: u32) -> NandResult<bool> {
        self.bad_blocks.read().unwrap().is_bad(physical)
    }

    /// Walks physical user blocks starting at `start`, in ascending order,
    /// skipping any marked bad. Used by `save_data`/`load_data`, which
    /// operate below the logical address space so a bad block found along
    /// the way is simply skipped rather than failing the whole transfer.
    fn next_writable_physical_block(&self, start: u32) -> NandResult<u32> {
        let num_blocks = self.geometry().num_blocks;
        let bad_blocks = self.bad_blocks.read().unwrap();
        for candidate in start..num_blocks {
            if self.address_space.reserved().contains_physical(candidate) {
                continue;
            }
            if !bad_blocks.is_bad(candidate)? {
                return Ok(candidate);
            }
        }
        Err(NandError::NoGoodBlocks)
    }

    /// Writes `data` across sequential user blocks, skipping bad ones, and
    /// records a user-metadata JSON record describing the file.
    fn save_data(&self, file_name: &str, data: &[u8]) -> NandResult<()> {
        let page_size = self.geometry().page_size;
        let pages_per_block = self.geometry().pages_per_block;
        let mut pages_used = 0u32;
        let mut next_block = 0u32;
        let mut offset = 0usize;

        while offset < data.len() {
            let physical = self.next_writable_physical_block(next_block)?;
            next_block = physical + 1;

            if let Err(err) = self.transport.erase_block(physical) {
                self.mark_bad_from_transport_error(physical, &err);
                continue;
            }
            for page in 0..pages_per_block {
                if offset >= data.len() {
                    break;
                }
                let end = (offset + page_size).min(data.len());
                let mut chunk = data[offset..end].to_vec();
                chunk.resize(page_size, 0);
                if let Err(err) = self.transport.write_page(physical, page, &chunk) {
                    self.mark_bad_from_transport_error(physical, &err);
                    return Err(err);
                }
                offset += page_size;
                pages_used += 1;
            }
            self.wear.write().unwrap().record_erase(physical).ok();
        }

        let record = FileRecord {
            file_name: file_name.to_string(),
            file_size: data.len() as u64,
            pages_used,
            written_at_unix_secs: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let metadata_block = self.address_space.reserved().block_for(ReservedRole::Metadata);
        let store = MetadataStore::new(&self.transport, *self.geometry());
        store.save_user_record(&json_record(&record)?, metadata_block)
    }

    /// Reads back data previously written by [`Inner::save_data`], bounding
    /// the output using the stored file-size metadata.
    fn load_data(&self) -> NandResult<(String, Vec<u8>)> {
        let metadata_block = self.address_space.reserved().block_for(ReservedRole::Metadata);
        let store = MetadataStore::new(&self.transport, *self.geometry());
        let record: UserMetadataRecord = store.load_user_record(metadata_block)?;
        let file_record: FileRecord = serde_json::from_slice(&record.payload)
            .map_err(|e| NandError::Corrupt { reason: e.to_string() })?;

        let pages_per_block = self.geometry().pages_per_block;
        let mut out = Vec::with_capacity(file_record.file_size as usize);
        let mut next_block = 0u32;
        let mut pages_read = 0u32;

        while pages_read < file_record.pages_used {
            let physical = self.next_writable_physical_block(next_block)?;
            next_block = physical + 1;
            for page in 0..pages_per_block {
                if pages_read >= file_record.pages_used {
                    break;
                }
                out.extend(self.transport.read_page(physical, page)?);
                pages_read += 1;
            }
        }
        out.truncate(file_record.file_size as usize);
        Ok((file_record.file_name, out))
    }
}

pub struct NandController<T: NandTransport> {
    inner: Arc<Inner<T>>,
    executor: ParallelExecutor,
}

impl<T: NandTransport> NandController<T> {
    pub fn new(transport: T, config: NandConfig) -> NandResult<Self> {
        crate::config::validate_firmware_spec(&config)?;
        transport.initialize()?;

        let geometry = Geometry {
            page_size: config.nand.page_size,
            pages_per_block: config.nand.pages_per_block,
            num_blocks: config.nand.num_blocks,
            oob_size: config.nand.oob_size,
            num_planes: config.nand.num_planes,
        };
        let reserved = ReservedBlocks::default();
        let address_space = AddressSpace::new(geometry, reserved);

        let ecc = EccEngine::new(config.ecc.to_kind())?;

        let compressor = config
            .compression
            .enabled
            .then(|| Compressor::new(config.compression.algorithm, config.compression.level));

        let cache = config.cache.enabled.then(|| {
            let mut cache = Cache::new(config.cache.capacity, config.cache.policy);
            if let Some(max_bytes) = config.cache.max_size_bytes {
                cache = cache.with_max_size_bytes(max_bytes);
            }
            if let Some(ttl) = config.cache.ttl() {
                cache = cache.with_default_ttl(ttl);
            }
            cache
        });

        let executor = ParallelExecutor::new(config.parallelism.max_workers);
        let stats = Statistics::new();

        let metadata_block = address_space.reserved().block_for(ReservedRole::BadBlockTable);
        let wear_block = address_space.reserved().block_for(ReservedRole::WearLeveling);
        let store = MetadataStore::new(&transport, geometry);

        let bad_blocks = match store.load_bad_block_table(metadata_block, geometry.num_blocks) {
            Ok(table) => table,
            Err(_) => {
                debug!("bad-block table unreadable at boot, falling back to factory scan");
                factory_scan(&transport, &address_space)
            }
        };

        let wear = match store.load_wear_level_table(wear_block, geometry.num_blocks) {
            Ok(mut table) => {
                table.threshold = config.wear_level.threshold;
                table
            }
            Err(_) => {
                debug!("wear-level table unreadable at boot, falling back to zeroed counters");
                WearLevelTable::new(geometry.num_blocks, config.wear_level.threshold)
            }
        };

        let inner = Inner {
            transport,
            address_space,
            ecc,
            compressor,
            cache,
            stats,
            bad_blocks: RwLock::new(bad_blocks),
            wear: RwLock::new(wear),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
            executor,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        self.inner.geometry()
    }

    pub fn read_page(&self, logical_block: u32, page: u32) -> NandResult<Vec<u8>> {
        self.inner.read_page(logical_block, page)
    }

    pub fn write_page(&self, logical_block: u32, page: u32, data: &[u8]) -> NandResult<()> {
        self.inner.write_page(logical_block, page, data)
    }

    pub fn erase_block(&self, logical_block: u32) -> NandResult<()> {
        self.inner.erase_block(logical_block)
    }

    pub fn is_bad_physical_block(&self, physical: u32) -> NandResult<bool> {
        self.inner.is_bad_physical_block(physical)
    }

    /// Submits every op to the parallel executor's worker pool and waits for
    /// all of them, rather than running them inline: each op clones the
    /// shared `Arc<Inner>` into a 'static closure, so ops genuinely overlap
    /// across `max_workers` threads instead of serializing behind `&self`.
    pub fn execute_parallel(&self, ops: Vec<BatchOp>) -> Vec<BatchOutcome>
    where
        T: 'static,
    {
        let submissions: Vec<(usize, bool, NandResult<JobHandle>)> = ops
            .into_iter()
            .enumerate()
            .map(|(index, op)| {
                let inner = Arc::clone(&self.inner);
                let is_read = matches!(op, BatchOp::Read { .. });
                let handle = match op {
                    BatchOp::Read { block, page } => {
                        self.executor.submit(move || inner.read_page(block, page))
                    }
                    BatchOp::Write { block, page, data } => self
                        .executor
                        .submit(move || inner.write_page(block, page, &data).map(|_| Vec::new())),
                    BatchOp::Erase { block } => {
                        self.executor.submit(move || inner.erase_block(block).map(|_| Vec::new()))
                    }
                };
                (index, is_read, handle)
            })
            .collect();

        submissions
            .into_iter()
            .map(|(index, is_read, handle)| {
                let result = match handle {
                    Ok(handle) => handle.wait().map(|data| is_read.then_some(data)),
                    Err(e) => Err(e),
                };
                BatchOutcome { index, result }
            })
            .collect()
    }

    pub fn device_info(&self) -> NandResult<DeviceInfo> {
        self.inner.device_info()
    }

    /// Flushes the bad-block and wear-level tables to their reserved
    /// blocks. Failures are logged, never propagated: the next boot falls
    /// back to a factory scan.
    pub fn shutdown(&self) {
        let store = MetadataStore::new(&self.inner.transport, *self.geometry());
        let metadata_block = self.inner.address_space.reserved().block_for(ReservedRole::BadBlockTable);
        let wear_block = self.inner.address_space.reserved().block_for(ReservedRole::WearLeveling);

        if let Err(e) = store.save_bad_block_table(&self.inner.bad_blocks.read().unwrap(), metadata_block, None) {
            warn!(error = ?e, "failed to persist bad-block table at shutdown");
        }
        if let Err(e) = store.save_wear_level_table(&self.inner.wear.read().unwrap(), wear_block) {
            warn!(error = ?e, "failed to persist wear-level table at shutdown");
        }
        self.executor.shutdown();
        let _ = self.inner.transport.shutdown();
    }

    pub fn save_data(&self, file_name: &str, data: &[u8]) -> NandResult<()> {
        self.inner.save_data(file_name, data)
    }

    pub fn load_data(&self) -> NandResult<(String, Vec<u8>)> {
        self.inner.load_data()
    }
}

fn factory_scan<T: NandTransport>(transport: &T, address_space: &AddressSpace) -> BadBlockTable {
    let geometry = address_space.geometry();
    let mut table = BadBlockTable::new(geometry.num_blocks);
    for block in 0..geometry.num_blocks {
        if address_space.reserved().contains_physical(block) {
            continue;
        }
        let first_bad = page_is_bad_indicator(transport, block, 0);
        let last_bad = page_is_bad_indicator(transport, block, geometry.pages_per_block - 1);
        if first_bad || last_bad {
            let _ = table.mark_bad(block);
        }
    }
    table
}

fn page_is_bad_indicator<T: NandTransport>(transport: &T, block: u32, page: u32) -> bool {
    match transport.read_page(block, page) {
        Ok(data) => data.first().is_some_and(|&b| b != 0xFF),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    fn tiny_config() -> NandConfig {
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

    #[test]
    fn happy_path_write_then_read() {
        let transport = MemoryTransport::new(Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        });
        let controller = NandController::new(transport, tiny_config()).unwrap();
        controller.write_page(0, 0, b"hello").unwrap();
        let read_back = controller.read_page(0, 0).unwrap();
        assert_eq!(&read_back[..5], b"hello");
    }

    #[test]
    fn write_failure_marks_block_bad() {
        let transport = MemoryTransport::new(Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        });
        let controller = NandController::new(transport, tiny_config()).unwrap();
        let physical = controller.inner.translate(0).unwrap();
        controller.inner.transport.inject_page_fault(physical, 0);
        assert!(controller.write_page(0, 0, b"x").is_err());
        assert!(controller.inner.bad_blocks.read().unwrap().is_bad(physical).unwrap());
        assert!(matches!(
            controller.write_page(0, 0, b"y"),
            Err(NandError::BadBlock { .. })
        ));
    }

    #[test]
    fn translate_rejects_out_of_range_logical_block() {
        let transport = MemoryTransport::new(Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        });
        let controller = NandController::new(transport, tiny_config()).unwrap();
        let user_blocks = controller.inner.address_space.user_blocks();
        assert!(matches!(
            controller.read_page(user_blocks, 0),
            Err(NandError::OutOfRange(_))
        ));
    }

    #[test]
    fn save_and_load_data_round_trips() {
        let transport = MemoryTransport::new(Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        });
        let controller = NandController::new(transport, tiny_config()).unwrap();
        let data = vec![7u8; 200];
        controller.save_data("payload.bin", &data).unwrap();
        let (name, restored) = controller.load_data().unwrap();
        assert_eq!(name, "payload.bin");
        assert_eq!(restored, data);
    }

    #[test]
    fn wear_level_threshold_survives_a_reload() {
        let transport = Arc::new(MemoryTransport::new(Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        }));

        let mut config = tiny_config();
        config.wear_level.threshold = 7;
        let controller = NandController::new(Arc::clone(&transport), config.clone()).unwrap();
        controller.shutdown();
        drop(controller);

        let reloaded = NandController::new(Arc::clone(&transport), config).unwrap();
        assert_eq!(reloaded.inner.wear.read().unwrap().threshold, 7);
    }

    #[test]
    fn execute_parallel_runs_every_op_through_the_executor() {
        let transport = MemoryTransport::new(Geometry {
            page_size: 64,
            pages_per_block: 4,
            num_blocks: 16,
            oob_size: 8,
            num_planes: 1,
        });
        let controller = NandController::new(transport, tiny_config()).unwrap();
        controller.write_page(0, 0, b"seed").unwrap();

        let outcomes = controller.execute_parallel(vec![
            BatchOp::Read { block: 0, page: 0 },
            BatchOp::Write { block: 1, page: 0, data: b"batched".to_vec() },
            BatchOp::Erase { block: 2 },
        ]);

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].result.as_ref().unwrap().as_deref().unwrap()[..4], *b"seed");
        assert!(outcomes[1].result.as_ref().unwrap().is_none());
        assert!(outcomes[2].result.as_ref().unwrap().is_none());
    }
}
