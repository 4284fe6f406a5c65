//! Wallet state singleton and the per-height applied block hash index.

use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};
use walletd_primitives::Hash256;
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::WalletError;

const STATE_KEY: &[u8] = b"state";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Balance {
    pub tx_count: u64,
    pub coin_count: u64,
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// The indexed prefix of the chain as this wallet sees it. `height` never
/// exceeds the chain height at the moment it is read; it may lag behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletState {
    pub height: u32,
    pub tip_hash: Hash256,
    /// Lowest height where lookahead consumption overran the watched window;
    /// a rescan from below this height recovers anything missed.
    pub recovery_height: Option<u32>,
    pub balance: Balance,
}

impl WalletState {
    pub fn genesis(tip_hash: Hash256) -> Self {
        Self {
            height: 0,
            tip_hash,
            recovery_height: None,
            balance: Balance::default(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u32_le(self.height);
        encoder.write_hash(&self.tip_hash);
        match self.recovery_height {
            Some(height) => {
                encoder.write_bool(true);
                encoder.write_u32_le(height);
            }
            None => {
                encoder.write_bool(false);
                encoder.write_u32_le(0);
            }
        }
        encoder.write_u64_le(self.balance.tx_count);
        encoder.write_u64_le(self.balance.coin_count);
        encoder.write_i64_le(self.balance.confirmed);
        encoder.write_i64_le(self.balance.unconfirmed);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let height = decoder.read_u32_le()?;
        let tip_hash = decoder.read_hash()?;
        let has_recovery = decoder.read_bool()?;
        let recovery = decoder.read_u32_le()?;
        let balance = Balance {
            tx_count: decoder.read_u64_le()?,
            coin_count: decoder.read_u64_le()?,
            confirmed: decoder.read_i64_le()?,
            unconfirmed: decoder.read_i64_le()?,
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            height,
            tip_hash,
            recovery_height: has_recovery.then_some(recovery),
            balance,
        })
    }
}

pub fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

pub struct MetaIndex<S> {
    store: S,
}

impl<S> MetaIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> MetaIndex<S> {
    pub fn state(&self) -> Result<Option<WalletState>, WalletError> {
        let bytes = match self.store.get(Column::Meta, STATE_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        Ok(Some(WalletState::decode(&bytes)?))
    }

    pub fn put_state(&self, batch: &mut WriteBatch, state: &WalletState) {
        batch.put(Column::Meta, STATE_KEY, state.encode());
    }

    pub fn block_hash(&self, height: u32) -> Result<Option<Hash256>, WalletError> {
        let bytes = match self.store.get(Column::BlockHash, &height_key(height))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let hash: Hash256 = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::Corrupt("invalid block hash length"))?;
        Ok(Some(hash))
    }

    pub fn put_block_hash(&self, batch: &mut WriteBatch, height: u32, hash: &Hash256) {
        batch.put(Column::BlockHash, height_key(height), *hash);
    }

    pub fn clear_block_hash(&self, batch: &mut WriteBatch, height: u32) {
        batch.delete(Column::BlockHash, height_key(height));
    }
}
