//! Persisted watch set: watched key hash -> derivation path.

use walletd_keys::KeyPath;
use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::WalletError;

const KEY_HASH_LEN: usize = 20;

pub fn encode_path(path: &KeyPath) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_u32_le(path.account);
    encoder.write_u32_le(path.branch);
    encoder.write_u32_le(path.index);
    encoder.into_inner()
}

pub fn decode_path(bytes: &[u8]) -> Result<KeyPath, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let path = KeyPath {
        account: decoder.read_u32_le()?,
        branch: decoder.read_u32_le()?,
        index: decoder.read_u32_le()?,
    };
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(path)
}

pub struct PathIndex<S> {
    store: S,
}

impl<S> PathIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> PathIndex<S> {
    pub fn get(&self, key_hash: &[u8; KEY_HASH_LEN]) -> Result<Option<KeyPath>, WalletError> {
        match self.store.get(Column::Path, key_hash)? {
            Some(bytes) => Ok(Some(decode_path(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, key_hash: &[u8; KEY_HASH_LEN], path: &KeyPath) {
        batch.put(Column::Path, *key_hash, encode_path(path));
    }

    pub fn for_each(
        &self,
        visitor: &mut dyn FnMut([u8; KEY_HASH_LEN], KeyPath),
    ) -> Result<(), WalletError> {
        let entries = self.store.scan_prefix(Column::Path, &[])?;
        for (key, value) in entries {
            let key_hash: [u8; KEY_HASH_LEN] = key
                .as_slice()
                .try_into()
                .map_err(|_| WalletError::Corrupt("invalid watched key hash length"))?;
            let path = decode_path(&value)?;
            visitor(key_hash, path);
        }
        Ok(())
    }
}
