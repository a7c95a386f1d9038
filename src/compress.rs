//! Block-level compression adapter over LZ-family (DEFLATE) and Zstd-family
//! algorithms.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{NandError, NandResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Deflate,
    Zstd,
}

pub struct Compressor {
    algorithm: CompressionAlgorithm,
    level: i32,
}

impl Compressor {
    pub fn new(algorithm: CompressionAlgorithm, level: i32) -> Self {
        Self { algorithm, level }
    }

    pub fn compress(&self, data: &[u8]) -> NandResult<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self.algorithm {
            CompressionAlgorithm::Deflate => {
                let level = self.level.clamp(0, 9) as u32;
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
                encoder
                    .write_all(data)
                    .map_err(|e| NandError::Transport(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| NandError::Transport(e.to_string()))
            }
            CompressionAlgorithm::Zstd => zstd::encode_all(data, self.level)
                .map_err(|e| NandError::Transport(e.to_string())),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> NandResult<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self.algorithm {
            CompressionAlgorithm::Deflate => {
                let mut decoder = DeflateDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|_| NandError::InvalidCompressedData)?;
                Ok(out)
            }
            CompressionAlgorithm::Zstd => {
                zstd::decode_all(data).map_err(|_| NandError::InvalidCompressedData)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_short_circuits() {
        let c = Compressor::new(CompressionAlgorithm::Deflate, 6);
        assert_eq!(c.compress(&[]).unwrap(), Vec::<u8>::new());
        assert_eq!(c.decompress(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn deflate_round_trips() {
        let c = Compressor::new(CompressionAlgorithm::Deflate, 6);
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly, repeatedly";
        let compressed = c.compress(data).unwrap();
        let restored = c.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn zstd_round_trips() {
        let c = Compressor::new(CompressionAlgorithm::Zstd, 3);
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly, repeatedly";
        let compressed = c.compress(data).unwrap();
        let restored = c.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn decompress_of_garbage_is_invalid_compressed_data() {
        let c = Compressor::new(CompressionAlgorithm::Zstd, 3);
        assert!(matches!(
            c.decompress(&[1, 2, 3, 4]),
            Err(NandError::InvalidCompressedData)
        ));
    }
}
