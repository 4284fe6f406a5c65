//! Accounts and bounded-lookahead depth tracking.
//!
//! An account watches indices `0..depth + lookahead` per branch. Depths only
//! move forward; rollback never shrinks them, since the same addresses may
//! be paid again once a reorg resolves differently.

use std::cmp;
use std::ops::Range;

use walletd_keys::{ExtendedPublicKey, KeyError, BRANCH_CHANGE, MAX_CHILD_INDEX};
use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::WalletError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub index: u32,
    pub key: ExtendedPublicKey,
    pub receive_depth: u32,
    pub change_depth: u32,
    pub lookahead: u32,
}

/// A depth advancement and the indices it made newly watchable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepthAdvance {
    pub branch: u32,
    pub new_indices: Range<u32>,
}

impl Account {
    pub fn new(index: u32, key: ExtendedPublicKey, lookahead: u32) -> Self {
        Self {
            index,
            key,
            receive_depth: 0,
            change_depth: 0,
            lookahead,
        }
    }

    pub fn branch_depth(&self, branch: u32) -> u32 {
        match branch {
            BRANCH_CHANGE => self.change_depth,
            _ => self.receive_depth,
        }
    }

    /// One past the highest watched index for a branch, clamped to the
    /// non-hardened derivation ceiling.
    pub fn window_end(&self, branch: u32) -> u32 {
        cmp::min(
            self.branch_depth(branch).saturating_add(self.lookahead),
            MAX_CHILD_INDEX + 1,
        )
    }

    /// Records a matched output at `index`. Advances the branch depth and
    /// returns the indices that just became watchable, or `None` if the
    /// index was already below the depth.
    pub fn mark_used(&mut self, branch: u32, index: u32) -> Option<DepthAdvance> {
        if index < self.branch_depth(branch) {
            return None;
        }
        let old_end = self.window_end(branch);
        match branch {
            BRANCH_CHANGE => self.change_depth = index + 1,
            _ => self.receive_depth = index + 1,
        }
        let new_end = self.window_end(branch);
        Some(DepthAdvance {
            branch,
            new_indices: old_end..new_end,
        })
    }

    /// Derives key hashes for a contiguous index range of one branch.
    pub fn derive_range(
        &self,
        branch: u32,
        range: Range<u32>,
    ) -> Result<Vec<(u32, [u8; 20])>, KeyError> {
        let branch_key = self.key.derive_child(branch)?;
        let mut out = Vec::with_capacity(range.len());
        for index in range {
            out.push((index, branch_key.derive_child(index)?.key_hash()));
        }
        Ok(out)
    }

    pub fn derive_key_hash(&self, branch: u32, index: u32) -> Result<[u8; 20], KeyError> {
        Ok(self.key.derive_path(&[branch, index])?.key_hash())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&self.key.to_bytes());
        encoder.write_u32_le(self.receive_depth);
        encoder.write_u32_le(self.change_depth);
        encoder.write_u32_le(self.lookahead);
        encoder.into_inner()
    }

    pub fn decode(index: u32, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let key_bytes = decoder.read_bytes(65)?;
        let key = ExtendedPublicKey::from_bytes(&key_bytes)
            .map_err(|_| DecodeError::InvalidData("invalid account key"))?;
        let receive_depth = decoder.read_u32_le()?;
        let change_depth = decoder.read_u32_le()?;
        let lookahead = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            index,
            key,
            receive_depth,
            change_depth,
            lookahead,
        })
    }
}

pub fn account_key(index: u32) -> [u8; 4] {
    index.to_be_bytes()
}

pub struct AccountIndex<S> {
    store: S,
}

impl<S> AccountIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AccountIndex<S> {
    pub fn get(&self, index: u32) -> Result<Option<Account>, WalletError> {
        match self.store.get(Column::Account, &account_key(index))? {
            Some(bytes) => Ok(Some(Account::decode(index, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, account: &Account) {
        batch.put(
            Column::Account,
            account_key(account.index),
            account.encode(),
        );
    }

    /// All accounts ordered by index; positions must be contiguous.
    pub fn all(&self) -> Result<Vec<Account>, WalletError> {
        let entries = self.store.scan_prefix(Column::Account, &[])?;
        let mut accounts = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let index_bytes: [u8; 4] = key
                .as_slice()
                .try_into()
                .map_err(|_| WalletError::Corrupt("invalid account key length"))?;
            let index = u32::from_be_bytes(index_bytes);
            if index as usize != accounts.len() {
                return Err(WalletError::Corrupt("account indices are not contiguous"));
            }
            accounts.push(Account::decode(index, &value)?);
        }
        Ok(accounts)
    }
}
