//! Systematic binary BCH(m, t) encoder/decoder over GF(2^m).
//!
//! Construction follows the classical textbook algorithm: build GF(2^m) log
//! tables from a primitive polynomial, derive the generator polynomial as
//! the LCM of the minimal polynomials of `alpha^1, alpha^3, ..., alpha^(2t-1)`,
//! encode by systematic synthetic division, and decode via
//! syndromes -> Berlekamp-Massey -> Chien search.

use std::collections::HashSet;

use crate::bits::{bits_to_bytes, bytes_to_bits, div_ceil};
use crate::error::{NandError, NandResult};
use crate::gf::GaloisField;

/// A configured BCH(m, t) codec.
#[derive(Debug, Clone)]
pub struct BchCodec {
    pub m: u32,
    pub t: u32,
    pub n: u32,
    gf: GaloisField,
    /// Generator polynomial, leading coefficient (always 1, monic) first.
    generator: Vec<u8>,
    pub parity_bits: u32,
    pub data_bits: u32,
    pub data_bytes: usize,
    pub ecc_bytes: usize,
}

impl BchCodec {
    pub fn new(m: u32, t: u32) -> NandResult<Self> {
        if !(3..=16).contains(&m) {
            return Err(NandError::OutOfRange(format!(
                "BCH parameter m must be 3..=16, got {m}"
            )));
        }
        let max_t = (1u32 << m) - 1;
        if t < 1 || t > max_t {
            return Err(NandError::OutOfRange(format!(
                "BCH parameter t must be 1..={max_t}, got {t}"
            )));
        }
        let gf = GaloisField::new(m).ok_or_else(|| {
            NandError::OutOfRange(format!("no primitive polynomial known for m={m}"))
        })?;
        let generator = compute_generator_polynomial(&gf, t);
        let parity_bits = generator.len() as u32 - 1;
        let n = gf.n;
        let data_bits = n - parity_bits;
        Ok(Self {
            m,
            t,
            n,
            data_bytes: div_ceil(data_bits as usize, 8),
            ecc_bytes: div_ceil(parity_bits as usize, 8),
            gf,
            generator,
            parity_bits,
            data_bits,
        })
    }

    /// Computes the ECC parity bytes for `data`. `data` shorter than
    /// `data_bytes` is zero-extended on the right.
    pub fn encode(&self, data: &[u8]) -> NandResult<Vec<u8>> {
        if data.len() > self.data_bytes {
            return Err(NandError::InputTooLarge {
                actual: data.len(),
                capacity: self.data_bytes,
            });
        }
        let data_bits = bytes_to_bits(data, self.data_bits as usize);

        let mut remainder = vec![0u8; self.n as usize];
        remainder[..self.data_bits as usize].copy_from_slice(&data_bits);

        for i in 0..self.data_bits as usize {
            if remainder[i] != 0 {
                for (j, &g) in self.generator.iter().enumerate().skip(1) {
                    remainder[i + j] ^= g;
                }
            }
        }

        let parity = &remainder[self.data_bits as usize..self.n as usize];
        Ok(bits_to_bytes(parity))
    }

    /// Decodes `codeword` (data bytes followed by `ecc_bytes` parity bytes),
    /// correcting up to `t` bit errors. Returns the corrected data and the
    /// number of bits flipped.
    pub fn decode(&self, codeword: &[u8]) -> NandResult<(Vec<u8>, usize)> {
        if codeword.len() < self.ecc_bytes {
            return Err(NandError::Corrupt {
                reason: format!(
                    "codeword of {} bytes shorter than ecc_bytes {}",
                    codeword.len(),
                    self.ecc_bytes
                ),
            });
        }
        let split = codeword.len() - self.ecc_bytes;
        let data_part = &codeword[..split];
        let ecc_part = &codeword[split..];

        let data_bits = bytes_to_bits(data_part, self.data_bits as usize);
        let ecc_bits = bytes_to_bits(ecc_part, self.parity_bits as usize);

        let mut received = vec![0u8; self.n as usize];
        received[..self.data_bits as usize].copy_from_slice(&data_bits);
        received[self.data_bits as usize..self.n as usize].copy_from_slice(&ecc_bits);

        let syndromes = self.syndromes(&received);
        if syndromes.iter().all(|&s| s == 0) {
            let original_bits = (data_part.len() * 8).min(self.data_bits as usize);
            return Ok((bits_to_bytes(&received[..original_bits]), 0));
        }

        let locator = self.berlekamp_massey(&syndromes);
        let degree = locator.len() - 1;
        let locations = self.chien_search(&locator);

        if locations.len() != degree {
            return Err(NandError::Uncorrectable);
        }

        for &loc in &locations {
            received[loc] ^= 1;
        }

        let original_bits = (data_part.len() * 8).min(self.data_bits as usize);
        let corrected = bits_to_bytes(&received[..original_bits]);
        Ok((corrected, locations.len()))
    }

    fn syndromes(&self, received: &[u8]) -> Vec<u32> {
        let n = self.n as usize;
        (0..2 * self.t)
            .map(|i| {
                let power = i + 1;
                let mut syndrome = 0u32;
                for (j, &bit) in received.iter().enumerate().take(n) {
                    if bit == 1 {
                        let idx = (power as u64 * j as u64) % self.n as u64;
                        syndrome ^= self.gf.alpha_to[idx as usize];
                    }
                }
                syndrome
            })
            .collect()
    }

    fn berlekamp_massey(&self, syndromes: &[u32]) -> Vec<u32> {
        let bm_len = syndromes.len();
        let mut c = vec![0u32; bm_len + 1];
        let mut b = vec![0u32; bm_len + 1];
        c[0] = 1;
        b[0] = 1;
        let mut l: usize = 0;

        for iter_idx in 0..bm_len {
            let mut d = syndromes[iter_idx];
            for i in 1..=l {
                if c[i] != 0 && iter_idx >= i {
                    d ^= self.gf.mul(c[i], syndromes[iter_idx - i]);
                }
            }
            if d == 0 {
                continue;
            }
            let t_poly = c.clone();
            let shift = iter_idx as isize - l as isize;
            debug_assert!(shift >= 0, "Berlekamp-Massey shift went negative");
            let shift = shift as usize;
            for i in 0..(bm_len + 1 - shift) {
                c[i + shift] ^= self.gf.mul(d, b[i]);
            }
            if 2 * l <= iter_idx {
                let new_l = iter_idx + 1 - l;
                for i in 0..=bm_len {
                    b[i] = self.gf.div(t_poly[i], d);
                }
                l = new_l;
            }
        }

        c.truncate(l + 1);
        c
    }

    fn chien_search(&self, locator: &[u32]) -> Vec<usize> {
        let n = self.n as usize;
        let mut locations = Vec::new();
        for i in 0..n {
            let mut eval = 0u32;
            for (j, &coef) in locator.iter().enumerate() {
                if coef != 0 {
                    let power = (j as u64 * (n as u64 - i as u64)) % self.n as u64;
                    eval ^= self.gf.mul(coef, self.gf.alpha_to[power as usize]);
                }
            }
            if eval == 0 {
                locations.push(i);
            }
        }
        locations
    }
}

/// Multiplies two polynomials with coefficients in GF(2^m).
fn gf_poly_mul(gf: &GaloisField, a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut result = vec![0u32; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        if ai == 0 {
            continue;
        }
        for (j, &bj) in b.iter().enumerate() {
            result[i + j] ^= gf.mul(ai, bj);
        }
    }
    result
}

/// The minimal polynomial of `alpha^root` over GF(2), computed as the
/// product of `(x + alpha^c)` over the conjugate orbit `c = root, 2*root,
/// 4*root, ...` (mod n) until the orbit closes back on `root`.
fn minimal_polynomial(gf: &GaloisField, root: u32) -> (Vec<u32>, Vec<u32>) {
    let n = gf.n;
    let mut conjugates = vec![root % n];
    loop {
        let next = (conjugates.last().unwrap() * 2) % n;
        if next == conjugates[0] {
            break;
        }
        conjugates.push(next);
    }

    let mut poly = vec![1u32];
    for &c in &conjugates {
        let factor = vec![1u32, gf.pow_alpha(c as i64)];
        poly = gf_poly_mul(gf, &poly, &factor);
    }
    (poly, conjugates)
}

/// `g(x) = lcm` of the minimal polynomials of `alpha^1, alpha^3, ...,
/// alpha^(2t-1)`, built by multiplying in the minimal polynomial of each
/// odd power not already covered by a previous root's conjugate orbit.
fn compute_generator_polynomial(gf: &GaloisField, t: u32) -> Vec<u8> {
    let mut g: Vec<u32> = vec![1];
    let mut covered: HashSet<u32> = HashSet::new();

    let mut i = 1u32;
    while i < 2 * t {
        if !covered.contains(&(i % gf.n)) {
            let (min_poly, conjugates) = minimal_polynomial(gf, i);
            g = gf_poly_mul(gf, &g, &min_poly);
            for c in conjugates {
                covered.insert(c);
            }
        }
        i += 2;
    }

    g.into_iter()
        .map(|coef| {
            debug_assert!(coef == 0 || coef == 1, "generator coefficient not binary");
            coef as u8
        })
        .collect()
}
