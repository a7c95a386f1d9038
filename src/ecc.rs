//! ECC facade: a single engine type over either BCH or LDPC, so upstream
//! code never has to branch on which codec is configured. Normalizes
//! byte/bit packing at this layer too, so callers only ever see bytes.

use serde::{Deserialize, Serialize};

use crate::bch::BchCodec;
use crate::error::{NandError, NandResult};
use crate::ldpc::LdpcCodec;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EccKind {
    Bch { m: u32, t: u32 },
    Ldpc {
        n: usize,
        d_v: usize,
        d_c: usize,
        seed: u64,
    },
}

pub enum EccEngine {
    Bch(BchCodec),
    Ldpc(LdpcCodec),
}

/// Outcome of a successful decode: the corrected payload and how many bits
/// were flipped to get there (0 means the codeword was clean).
pub struct EccDecoded {
    pub data: Vec<u8>,
    pub bit_flips: usize,
}

/// Bytes carried ahead of the framed payload recording its true length, so
/// zero-padding the final block doesn't get mistaken for real data on the
/// way back out.
const LENGTH_PREFIX_BYTES: usize = 4;

impl EccEngine {
    pub fn new(kind: EccKind) -> NandResult<Self> {
        match kind {
            EccKind::Bch { m, t } => Ok(Self::Bch(BchCodec::new(m, t)?)),
            EccKind::Ldpc { n, d_v, d_c, seed } => {
                Ok(Self::Ldpc(LdpcCodec::new(n, d_v, d_c, true, seed)?))
            }
        }
    }

    /// Bytes of user payload a single underlying codeword covers (rounded up
    /// to a whole byte — see `safe_chunk_bytes` for the loss-free figure
    /// chunking actually uses).
    pub fn data_bytes(&self) -> usize {
        match self {
            Self::Bch(codec) => codec.data_bytes,
            Self::Ldpc(codec) => codec.data_bytes(),
        }
    }

    /// Bytes a single codeword occupies on the wire once encoded.
    fn block_codeword_bytes(&self) -> usize {
        match self {
            Self::Bch(codec) => codec.data_bytes + codec.ecc_bytes,
            Self::Ldpc(codec) => codec.codeword_bytes(),
        }
    }

    /// Real payload bytes that fit in one block without spilling into the
    /// handful of bits between the codec's bit capacity and the next byte
    /// boundary — using the rounded-up `data_bytes` directly here would
    /// silently truncate any data landing in those trailing bits.
    fn safe_chunk_bytes(&self) -> usize {
        match self {
            Self::Bch(codec) => codec.data_bits as usize / 8,
            Self::Ldpc(codec) => codec.k / 8,
        }
    }

    fn encode_block(&self, data: &[u8]) -> NandResult<Vec<u8>> {
        match self {
            Self::Bch(codec) => {
                let parity = codec.encode(data)?;
                let mut out = data.to_vec();
                out.extend_from_slice(&parity);
                Ok(out)
            }
            Self::Ldpc(codec) => codec.encode(data),
        }
    }

    fn decode_block(&self, codeword: &[u8]) -> NandResult<(Vec<u8>, usize)> {
        match self {
            Self::Bch(codec) => codec.decode(codeword),
            Self::Ldpc(codec) => codec.decode(codeword),
        }
    }

    /// Encodes `data` of any length into one or more fixed-size codewords.
    /// `data` is framed behind a 4-byte length header and split into blocks
    /// no larger than `safe_chunk_bytes`, each zero-padded out to the
    /// codec's full `data_bytes` capacity before the underlying codec
    /// encodes it, so every emitted codeword is the same size.
    pub fn encode(&self, data: &[u8]) -> NandResult<Vec<u8>> {
        let chunk_bytes = self.safe_chunk_bytes();
        if chunk_bytes == 0 {
            return Err(NandError::OutOfRange(
                "ECC engine has less than one byte of usable payload capacity per block".to_string(),
            ));
        }
        let block_capacity = self.data_bytes();

        let mut framed = Vec::with_capacity(LENGTH_PREFIX_BYTES + data.len());
        framed.extend_from_slice(&(data.len() as u32).to_le_bytes());
        framed.extend_from_slice(data);

        let mut out = Vec::new();
        for chunk in framed.chunks(chunk_bytes) {
            let mut padded = chunk.to_vec();
            padded.resize(block_capacity, 0);
            out.extend(self.encode_block(&padded)?);
        }
        Ok(out)
    }

    /// Decodes a codeword produced by [`EccEngine::encode`], reassembling
    /// every block and trimming back to the length recorded in the header.
    pub fn decode(&self, codeword: &[u8]) -> NandResult<EccDecoded> {
        let block_len = self.block_codeword_bytes();
        if block_len == 0 || codeword.is_empty() || codeword.len() % block_len != 0 {
            return Err(NandError::Corrupt {
                reason: format!(
                    "codeword of {} bytes is not a multiple of the {block_len}-byte block size",
                    codeword.len()
                ),
            });
        }

        let chunk_bytes = self.safe_chunk_bytes();
        let mut framed = Vec::new();
        let mut bit_flips = 0usize;
        for block in codeword.chunks(block_len) {
            let (decoded_block, flips) = self.decode_block(block)?;
            bit_flips += flips;
            framed.extend_from_slice(&decoded_block[..chunk_bytes.min(decoded_block.len())]);
        }

        if framed.len() < LENGTH_PREFIX_BYTES {
            return Err(NandError::Corrupt {
                reason: "decoded payload shorter than its length header".to_string(),
            });
        }
        let len = u32::from_le_bytes(framed[..LENGTH_PREFIX_BYTES].try_into().unwrap()) as usize;
        let payload = framed
            .get(LENGTH_PREFIX_BYTES..LENGTH_PREFIX_BYTES + len)
            .ok_or_else(|| NandError::Corrupt {
                reason: "decoded length header exceeds decoded payload".to_string(),
            })?
            .to_vec();
        Ok(EccDecoded {
            data: payload,
            bit_flips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bch_engine_round_trips() {
        let engine = EccEngine::new(EccKind::Bch { m: 8, t: 4 }).unwrap();
        let data = b"engine test payload!";
        let codeword = engine.encode(data).unwrap();
        let decoded = engine.decode(&codeword).unwrap();
        assert_eq!(&decoded.data[..data.len()], &data[..]);
        assert_eq!(decoded.bit_flips, 0);
    }

    #[test]
    fn ldpc_engine_round_trips() {
        let engine = EccEngine::new(EccKind::Ldpc {
            n: 32,
            d_v: 3,
            d_c: 4,
            seed: 99,
        })
        .unwrap();
        let data = vec![0xAAu8];
        let codeword = engine.encode(&data).unwrap();
        let decoded = engine.decode(&codeword).unwrap();
        assert_eq!(decoded.data[0], data[0]);
    }
}
