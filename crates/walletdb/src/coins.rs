//! Wallet coin set backed by the storage trait.

use walletd_keys::KeyPath;
use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};
use walletd_primitives::OutPoint;
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::WalletError;

pub const OUTPOINT_KEY_LEN: usize = 36;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinEntry {
    pub value: i64,
    pub key_hash: [u8; 20],
    pub path: KeyPath,
    pub height: u32,
    pub coinbase: bool,
}

impl CoinEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.value);
        encoder.write_bytes(&self.key_hash);
        encoder.write_u32_le(self.path.account);
        encoder.write_u32_le(self.path.branch);
        encoder.write_u32_le(self.path.index);
        encoder.write_u32_le(self.height);
        encoder.write_bool(self.coinbase);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let key_hash = decoder.read_fixed::<20>()?;
        let path = KeyPath {
            account: decoder.read_u32_le()?,
            branch: decoder.read_u32_le()?,
            index: decoder.read_u32_le()?,
        };
        let height = decoder.read_u32_le()?;
        let coinbase = decoder.read_bool()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            key_hash,
            path,
            height,
            coinbase,
        })
    }
}

pub fn outpoint_key(outpoint: &OutPoint) -> [u8; OUTPOINT_KEY_LEN] {
    let mut bytes = [0u8; OUTPOINT_KEY_LEN];
    bytes[..32].copy_from_slice(&outpoint.hash);
    bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
    bytes
}

pub struct CoinIndex<S> {
    store: S,
}

impl<S> CoinIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> CoinIndex<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<CoinEntry>, WalletError> {
        let key = outpoint_key(outpoint);
        match self.store.get(Column::Coin, &key)? {
            Some(bytes) => Ok(Some(CoinEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, entry: &CoinEntry) {
        batch.put(Column::Coin, outpoint_key(outpoint), entry.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        batch.delete(Column::Coin, outpoint_key(outpoint));
    }
}
