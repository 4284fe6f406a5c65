//! Wallet-relevant transaction records.

use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};
use walletd_primitives::Hash256;
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::WalletError;
use crate::events::TxDetails;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxRecord {
    pub txid: Hash256,
    pub height: u32,
    pub block_index: u32,
    pub received: i64,
    pub sent: i64,
}

impl TxRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u32_le(self.height);
        encoder.write_u32_le(self.block_index);
        encoder.write_i64_le(self.received);
        encoder.write_i64_le(self.sent);
        encoder.into_inner()
    }

    pub fn decode(txid: Hash256, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let height = decoder.read_u32_le()?;
        let block_index = decoder.read_u32_le()?;
        let received = decoder.read_i64_le()?;
        let sent = decoder.read_i64_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            txid,
            height,
            block_index,
            received,
            sent,
        })
    }

    pub fn details(&self) -> TxDetails {
        TxDetails {
            txid: self.txid,
            block_index: self.block_index,
            received: self.received,
            sent: self.sent,
        }
    }
}

pub struct TxIndex<S> {
    store: S,
}

impl<S> TxIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TxIndex<S> {
    pub fn get(&self, txid: &Hash256) -> Result<Option<TxRecord>, WalletError> {
        match self.store.get(Column::Tx, txid)? {
            Some(bytes) => Ok(Some(TxRecord::decode(*txid, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, record: &TxRecord) {
        batch.put(Column::Tx, record.txid, record.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, txid: &Hash256) {
        batch.delete(Column::Tx, *txid);
    }
}
