//! BIP37-style bloom filter backing the shared watch filter.

use std::cmp;

use bitvec::prelude::*;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

/// Maximum filter size in bytes.
pub const MAX_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions.
pub const MAX_HASH_FUNCS: u32 = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    filter: BitVec<u8, Lsb0>,
    n_hash_funcs: u32,
    n_tweak: u32,
}

impl BloomFilter {
    /// Sizes the filter for `elements` entries at `false_positive_rate`,
    /// clamped to the BIP37 limits.
    pub fn new(elements: u32, false_positive_rate: f64, tweak: u32) -> Self {
        let elements = cmp::max(elements, 1);
        let rate = false_positive_rate.clamp(1e-9, 0.5);

        let ln2 = std::f64::consts::LN_2;
        let ln2_squared = ln2 * ln2;

        let filter_size = (-1.0 * elements as f64 * rate.ln() / ln2_squared).ceil() as usize;
        let filter_size = cmp::max(8, cmp::min(filter_size, MAX_FILTER_SIZE * 8));

        let n_hash_funcs = (filter_size as f64 / elements as f64 * ln2).ceil() as u32;
        let n_hash_funcs = cmp::max(1, cmp::min(n_hash_funcs, MAX_HASH_FUNCS));

        Self {
            filter: bitvec![u8, Lsb0; 0; filter_size],
            n_hash_funcs,
            n_tweak: tweak,
        }
    }

    pub fn insert(&mut self, data: &[u8]) {
        for i in 0..self.n_hash_funcs {
            let index = self.bit_index(i, data);
            self.filter.set(index, true);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        for i in 0..self.n_hash_funcs {
            if !self.filter[self.bit_index(i, data)] {
                return false;
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.filter.fill(false);
    }

    pub fn is_empty(&self) -> bool {
        !self.filter.any()
    }

    pub fn size(&self) -> usize {
        self.filter.len().div_ceil(8)
    }

    pub fn hash_funcs(&self) -> u32 {
        self.n_hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.n_tweak
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.filter.as_raw_slice().to_vec()
    }

    fn bit_index(&self, hash_num: u32, data: &[u8]) -> usize {
        let seed = hash_num.wrapping_mul(0xfba4c795).wrapping_add(self.n_tweak);
        (murmur3(data, seed) as usize) % self.filter.len()
    }
}

impl Encodable for BloomFilter {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.to_bytes());
        encoder.write_u32_le(self.n_hash_funcs);
        encoder.write_u32_le(self.n_tweak);
    }
}

impl Decodable for BloomFilter {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let data = decoder.read_var_bytes()?;
        if data.len() > MAX_FILTER_SIZE || data.is_empty() {
            return Err(DecodeError::InvalidData("invalid bloom filter size"));
        }
        let n_hash_funcs = decoder.read_u32_le()?;
        if n_hash_funcs == 0 || n_hash_funcs > MAX_HASH_FUNCS {
            return Err(DecodeError::InvalidData("invalid bloom hash count"));
        }
        let n_tweak = decoder.read_u32_le()?;
        Ok(Self {
            filter: BitVec::from_vec(data),
            n_hash_funcs,
            n_tweak,
        })
    }
}

/// 32-bit Murmur3 as specified in BIP37.
pub fn murmur3(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut hash = seed;
    let nblocks = data.len() / 4;

    for i in 0..nblocks {
        let k =
            u32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]]);
        let k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1 = 0u32;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k1;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85ebca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2ae35);
    hash ^= hash >> 16;

    hash
}
