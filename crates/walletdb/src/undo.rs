//! Per-height undo records, sufficient to reverse a block's wallet effects.

use walletd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use walletd_primitives::{Hash256, OutPoint};
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::coins::CoinEntry;
use crate::error::WalletError;
use crate::meta::height_key;

const BLOCK_UNDO_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoCoin {
    pub outpoint: OutPoint,
    pub entry: CoinEntry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockUndo {
    /// Txids of wallet-relevant transactions applied at this height.
    pub txids: Vec<Hash256>,
    /// Coins credited at this height.
    pub created: Vec<UndoCoin>,
    /// Coins debited at this height, with the entry needed to restore them.
    pub spent: Vec<UndoCoin>,
}

impl BlockUndo {
    pub fn is_empty(&self) -> bool {
        self.txids.is_empty() && self.created.is_empty() && self.spent.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.txids.len() as u32);
        for txid in &self.txids {
            encoder.write_hash(txid);
        }
        encoder.write_u32_le(self.created.len() as u32);
        for coin in &self.created {
            coin.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&coin.entry.encode());
        }
        encoder.write_u32_le(self.spent.len() as u32);
        for coin in &self.spent {
            coin.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&coin.entry.encode());
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let txid_count = decoder.read_u32_le()? as usize;
        let mut txids = Vec::with_capacity(txid_count);
        for _ in 0..txid_count {
            txids.push(decoder.read_hash()?);
        }
        let created = decode_coins(&mut decoder)?;
        let spent = decode_coins(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            txids,
            created,
            spent,
        })
    }
}

fn decode_coins(decoder: &mut Decoder) -> Result<Vec<UndoCoin>, DecodeError> {
    let count = decoder.read_u32_le()? as usize;
    let mut coins = Vec::with_capacity(count);
    for _ in 0..count {
        let outpoint = OutPoint::consensus_decode(decoder)?;
        let entry_bytes = decoder.read_var_bytes()?;
        let entry = CoinEntry::decode(&entry_bytes)
            .map_err(|_| DecodeError::InvalidData("invalid coin entry in undo"))?;
        coins.push(UndoCoin { outpoint, entry });
    }
    Ok(coins)
}

pub struct UndoIndex<S> {
    store: S,
}

impl<S> UndoIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> UndoIndex<S> {
    pub fn get(&self, height: u32) -> Result<Option<BlockUndo>, WalletError> {
        match self.store.get(Column::BlockUndo, &height_key(height))? {
            Some(bytes) => Ok(Some(BlockUndo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, height: u32, undo: &BlockUndo) {
        batch.put(Column::BlockUndo, height_key(height), undo.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, height: u32) {
        batch.delete(Column::BlockUndo, height_key(height));
    }
}
