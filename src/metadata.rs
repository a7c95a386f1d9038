//! Signature-versioned records persisted in reserved blocks.

use serde::{Deserialize, Serialize};

use crate::bad_block::BadBlockTable;
use crate::error::{NandError, NandResult};
use crate::geometry::Geometry;
use crate::transport::NandTransport;
use crate::wear_level::WearLevelTable;

const SIGNATURE: u32 = 0x4D455441; // "META"
const VERSION: u32 = 1;

const USER_RECORD_TYPE_JSON: u32 = 1;
const USER_RECORD_TYPE_OPAQUE: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMetadataRecord {
    pub record_type: u32,
    pub payload: Vec<u8>,
}

fn pack_header(signature: u32, version: u32, extra: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + extra.len() * 4);
    out.extend_from_slice(&signature.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    for &value in extra {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn read_u32_le(bytes: &[u8], offset: usize) -> NandResult<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|slice| u32::from_le_bytes(slice.try_into().unwrap()))
        .ok_or_else(|| NandError::Corrupt {
            reason: format!("record too short to read u32 at offset {offset}"),
        })
}

fn pad_to(mut bytes: Vec<u8>, page_size: usize) -> Vec<u8> {
    if bytes.len() < page_size {
        bytes.resize(page_size, 0xFF);
    }
    bytes
}

fn pages_needed(bytes: usize, page_size: usize) -> usize {
    crate::bits::div_ceil(bytes.max(1), page_size)
}

/// Reads and writes the bad-block table, wear-level table, and
/// user-defined records to their reserved blocks.
pub struct MetadataStore<'a, T: NandTransport> {
    transport: &'a T,
    geometry: Geometry,
}

impl<'a, T: NandTransport> MetadataStore<'a, T> {
    pub fn new(transport: &'a T, geometry: Geometry) -> Self {
        Self { transport, geometry }
    }

    fn write_pages(&self, block: u32, bytes: &[u8]) -> NandResult<()> {
        self.transport.erase_block(block)?;
        let page_size = self.geometry.page_size;
        let mut offset = 0;
        let mut page = 0u32;
        while offset < bytes.len() {
            let end = (offset + page_size).min(bytes.len());
            let chunk = pad_to(bytes[offset..end].to_vec(), page_size);
            self.transport.write_page(block, page, &chunk)?;
            offset += page_size;
            page += 1;
        }
        if bytes.is_empty() {
            self.transport
                .write_page(block, 0, &pad_to(Vec::new(), page_size))?;
        }
        Ok(())
    }

    fn read_pages(&self, block: u32, total_bytes: usize) -> NandResult<Vec<u8>> {
        let page_size = self.geometry.page_size;
        let num_pages = pages_needed(total_bytes, page_size);
        let mut out = Vec::with_capacity(num_pages * page_size);
        for page in 0..num_pages as u32 {
            out.extend(self.transport.read_page(block, page)?);
        }
        Ok(out)
    }

    /// Saves the bad-block table to `block`, falling back to `backup_block`
    /// if the primary write fails. A failure on both is returned to the
    /// caller (the controller logs it and continues at shutdown rather
    /// than aborting).
    pub fn save_bad_block_table(
        &self,
        table: &BadBlockTable,
        block: u32,
        backup_block: Option<u32>,
    ) -> NandResult<()> {
        let bad_blocks: Vec<u32> = (0..table.num_blocks())
            .filter(|&b| table.is_bad(b).unwrap_or(false))
            .collect();
        let mut bytes = pack_header(SIGNATURE, VERSION, &[bad_blocks.len() as u32]);
        for b in &bad_blocks {
            bytes.extend_from_slice(&b.to_le_bytes());
        }

        match self.write_pages(block, &bytes) {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                if let Some(backup) = backup_block {
                    self.write_pages(backup, &bytes)
                } else {
                    Err(primary_err)
                }
            }
        }
    }

    /// Loads the bad-block table from `block`. On signature/version
    /// mismatch or a transport error, returns `Corrupt` so the caller can
    /// fall back to a factory scan.
    pub fn load_bad_block_table(&self, block: u32, num_blocks: u32) -> NandResult<BadBlockTable> {
        let header = self.read_pages(block, 12)?;
        let signature = read_u32_le(&header, 0)?;
        let version = read_u32_le(&header, 4)?;
        if signature != SIGNATURE || version != VERSION {
            return Err(NandError::Corrupt {
                reason: "bad-block record signature/version mismatch".to_string(),
            });
        }
        let count = read_u32_le(&header, 8)? as usize;
        let full = self.read_pages(block, 12 + count * 4)?;

        let mut table = BadBlockTable::new(num_blocks);
        for i in 0..count {
            let b = read_u32_le(&full, 12 + i * 4)?;
            if b < num_blocks {
                table.mark_bad(b)?;
            }
        }
        Ok(table)
    }

    pub fn save_wear_level_table(&self, table: &WearLevelTable, block: u32) -> NandResult<()> {
        let mut bytes = pack_header(SIGNATURE, VERSION, &[]);
        for b in 0..table.num_blocks() {
            bytes.extend_from_slice(&b.to_le_bytes());
            bytes.extend_from_slice(&table.erase_count(b)?.to_le_bytes());
        }
        self.write_pages(block, &bytes)
    }

    pub fn load_wear_level_table(
        &self,
        block: u32,
        num_blocks: u32,
    ) -> NandResult<WearLevelTable> {
        let total_bytes = 8 + num_blocks as usize * 8;
        let bytes = self.read_pages(block, total_bytes)?;
        let signature = read_u32_le(&bytes, 0)?;
        let version = read_u32_le(&bytes, 4)?;
        if signature != SIGNATURE || version != VERSION {
            return Err(NandError::Corrupt {
                reason: "wear-level record signature/version mismatch".to_string(),
            });
        }
        let mut table = WearLevelTable::new(num_blocks, 0);
        let mut offset = 8;
        while offset + 8 <= bytes.len() {
            let b = read_u32_le(&bytes, offset)?;
            let count = read_u32_le(&bytes, offset + 4)?;
            if b < num_blocks {
                for _ in 0..count {
                    table.record_erase(b)?;
                }
            }
            offset += 8;
        }
        Ok(table)
    }

    /// Writes a user metadata record to the last page of `block`.
    pub fn save_user_record(&self, record: &UserMetadataRecord, block: u32) -> NandResult<()> {
        let header = pack_header(
            SIGNATURE,
            VERSION,
            &[record.record_type, record.payload.len() as u32],
        );
        let mut bytes = header;
        bytes.extend_from_slice(&record.payload);
        let page_size = self.geometry.page_size;
        let last_page = self.geometry.pages_per_block - 1;
        self.transport
            .write_page(block, last_page, &pad_to(bytes, page_size))
    }

    pub fn load_user_record(&self, block: u32) -> NandResult<UserMetadataRecord> {
        let last_page = self.geometry.pages_per_block - 1;
        let bytes = self.transport.read_page(block, last_page)?;
        let signature = read_u32_le(&bytes, 0)?;
        let version = read_u32_le(&bytes, 4)?;
        if signature != SIGNATURE || version != VERSION {
            return Err(NandError::Corrupt {
                reason: "user metadata record signature/version mismatch".to_string(),
            });
        }
        let record_type = read_u32_le(&bytes, 8)?;
        let size = read_u32_le(&bytes, 12)? as usize;
        let payload = bytes
            .get(16..16 + size)
            .ok_or_else(|| NandError::Corrupt {
                reason: "user metadata record payload truncated".to_string(),
            })?
            .to_vec();
        Ok(UserMetadataRecord {
            record_type,
            payload,
        })
    }
}

pub fn json_record<S: Serialize>(value: &S) -> NandResult<UserMetadataRecord> {
    let payload =
        serde_json::to_vec(value).map_err(|e| NandError::Corrupt { reason: e.to_string() })?;
    Ok(UserMetadataRecord {
        record_type: USER_RECORD_TYPE_JSON,
        payload,
    })
}

pub fn opaque_record(payload: Vec<u8>) -> UserMetadataRecord {
    UserMetadataRecord {
        record_type: USER_RECORD_TYPE_OPAQUE,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

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
    fn bad_block_table_round_trips_through_reserved_block() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        let store = MetadataStore::new(&transport, geometry());
        let mut table = BadBlockTable::new(16);
        table.mark_bad(3).unwrap();
        table.mark_bad(9).unwrap();
        store.save_bad_block_table(&table, 1, None).unwrap();
        let loaded = store.load_bad_block_table(1, 16).unwrap();
        assert!(loaded.is_bad(3).unwrap());
        assert!(loaded.is_bad(9).unwrap());
        assert!(!loaded.is_bad(4).unwrap());
    }

    #[test]
    fn wear_level_table_round_trips() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        let store = MetadataStore::new(&transport, geometry());
        let mut table = WearLevelTable::new(16, 100);
        table.record_erase(2).unwrap();
        table.record_erase(2).unwrap();
        store.save_wear_level_table(&table, 2).unwrap();
        let loaded = store.load_wear_level_table(2, 16).unwrap();
        assert_eq!(loaded.erase_count(2).unwrap(), 2);
        assert_eq!(loaded.erase_count(5).unwrap(), 0);
    }

    #[test]
    fn user_json_record_round_trips() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        let store = MetadataStore::new(&transport, geometry());
        let record = json_record(&vec!["a", "b", "c"]).unwrap();
        store.save_user_record(&record, 0).unwrap();
        let loaded = store.load_user_record(0).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn loading_unwritten_block_is_corrupt() {
        let transport = MemoryTransport::new(geometry());
        transport.initialize().unwrap();
        let store = MetadataStore::new(&transport, geometry());
        assert!(matches!(
            store.load_bad_block_table(5, 16),
            Err(NandError::Corrupt { .. })
        ));
    }
}
