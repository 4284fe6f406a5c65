//! Block application and reversal.
//!
//! Exactly one call per height, ascending. A block either commits as one
//! batch or leaves the persisted state untouched. Depth advancement happens
//! the moment an output matches, so outputs later in the same block are
//! evaluated against the already-extended window.

use std::collections::{BTreeSet, HashMap, HashSet};

use walletd_keys::KeyPath;
use walletd_primitives::{Address, BlockHeader, OutPoint, Transaction};
use walletd_storage::{KeyValueStore, WriteBatch};

use crate::coins::CoinEntry;
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::txdb::TxRecord;
use crate::undo::{BlockUndo, UndoCoin};
use crate::walletdb::{Inner, WalletDb};

impl<S: KeyValueStore> WalletDb<S> {
    pub(crate) fn apply_block_locked(
        &self,
        inner: &mut Inner,
        header: &BlockHeader,
        height: u32,
        txs: &[Transaction],
        filtered: bool,
    ) -> Result<Vec<WalletEvent>, WalletError> {
        if height != inner.state.height + 1 {
            return Err(WalletError::Corrupt("blocks must be applied in order"));
        }
        if header.prev_block != inner.state.tip_hash {
            return Err(WalletError::ChainInconsistency {
                height,
                expected: inner.state.tip_hash,
                found: header.prev_block,
            });
        }
        let block_hash = header.hash();

        let mut batch = WriteBatch::new();
        let mut undo = BlockUndo::default();
        let mut balance = inner.state.balance;
        let mut events = Vec::new();
        // Coins created earlier in this block, spendable by later txs.
        let mut overlay: HashMap<OutPoint, CoinEntry> = HashMap::new();
        let mut spent_in_block: HashSet<OutPoint> = HashSet::new();
        let mut dirty_accounts: BTreeSet<u32> = BTreeSet::new();
        // Key hashes of outputs that did not match when scanned; if one of
        // them is watched by the end of the block, the block paid an
        // address the window only reached mid-scan.
        let mut skipped: Vec<[u8; 20]> = Vec::new();
        let mut extended = false;

        for (tx_index, tx) in txs.iter().enumerate() {
            let txid = tx.txid();
            let mut received = 0i64;
            let mut sent = 0i64;

            if !tx.is_coinbase() {
                for input in &tx.vin {
                    if spent_in_block.contains(&input.prevout) {
                        continue;
                    }
                    let entry = match overlay.get(&input.prevout) {
                        Some(entry) => Some(entry.clone()),
                        None => self.coins.get(&input.prevout)?,
                    };
                    let Some(entry) = entry else {
                        continue;
                    };
                    sent = sent
                        .checked_add(entry.value)
                        .ok_or(WalletError::ValueOutOfRange)?;
                    balance.coin_count = balance
                        .coin_count
                        .checked_sub(1)
                        .ok_or(WalletError::Corrupt("coin count underflow"))?;
                    self.coins.delete(&mut batch, &input.prevout);
                    overlay.remove(&input.prevout);
                    spent_in_block.insert(input.prevout.clone());
                    undo.spent.push(UndoCoin {
                        outpoint: input.prevout.clone(),
                        entry,
                    });
                }
            }

            for (output_index, output) in tx.vout.iter().enumerate() {
                let Some(address) = Address::from_script_pubkey(&output.script_pubkey) else {
                    continue;
                };
                let Some(path) = inner.watch.contains(&address.hash) else {
                    skipped.push(address.hash);
                    continue;
                };
                let outpoint = OutPoint::new(txid, output_index as u32);
                let entry = CoinEntry {
                    value: output.value,
                    key_hash: address.hash,
                    path,
                    height,
                    coinbase: tx.is_coinbase(),
                };
                received = received
                    .checked_add(output.value)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.coin_count = balance
                    .coin_count
                    .checked_add(1)
                    .ok_or(WalletError::ValueOutOfRange)?;
                self.coins.put(&mut batch, &outpoint, &entry);
                overlay.insert(outpoint.clone(), entry.clone());
                undo.created.push(UndoCoin { outpoint, entry });

                if self.extend_window(inner, &mut batch, path)? {
                    extended = true;
                    dirty_accounts.insert(path.account);
                }
            }

            if received != 0 || sent != 0 {
                let record = TxRecord {
                    txid,
                    height,
                    block_index: tx_index as u32,
                    received,
                    sent,
                };
                self.txs.put(&mut batch, &record);
                undo.txids.push(txid);
                let delta = received
                    .checked_sub(sent)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.tx_count = balance
                    .tx_count
                    .checked_add(1)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.confirmed = balance
                    .confirmed
                    .checked_add(delta)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.unconfirmed = balance
                    .unconfirmed
                    .checked_add(delta)
                    .ok_or(WalletError::ValueOutOfRange)?;
                events.push(WalletEvent::Confirmed {
                    wallet_id: self.config.wallet_id.clone(),
                    tx: record.details(),
                    height,
                });
            }
        }

        let mut state = inner.state.clone();
        state.height = height;
        state.tip_hash = block_hash;
        state.balance = balance;

        // Under filtered delivery any extension means the upstream filter
        // was missing keys for this block. For full blocks an output was
        // missed only if its key became watched later in the same block.
        let overrun = if filtered {
            extended
        } else {
            skipped
                .iter()
                .any(|key_hash| inner.watch.contains(key_hash).is_some())
        };
        if overrun {
            let flagged = state.recovery_height.map_or(height, |r| r.min(height));
            state.recovery_height = Some(flagged);
            walletd_log::log_warn!(
                "lookahead window overrun at height {height}; rescan from {flagged} will recover"
            );
        }

        for index in dirty_accounts {
            self.accounts_index
                .put(&mut batch, &inner.accounts[index as usize]);
        }
        if !undo.is_empty() {
            self.undo.put(&mut batch, height, &undo);
        }
        self.meta.put_block_hash(&mut batch, height, &block_hash);
        self.meta.put_state(&mut batch, &state);
        self.store.write_batch(&batch)?;
        inner.state = state;

        events.push(WalletEvent::HeightChanged { height });
        Ok(events)
    }

    /// Advances an account's depth for a used path and derives the newly
    /// watchable indices into the watch set and filter. Runs before the
    /// next output of the same block is evaluated.
    fn extend_window(
        &self,
        inner: &mut Inner,
        batch: &mut WriteBatch,
        used: KeyPath,
    ) -> Result<bool, WalletError> {
        let Inner {
            accounts, watch, ..
        } = inner;
        let account = accounts
            .get_mut(used.account as usize)
            .ok_or(WalletError::NotFound("account"))?;
        let Some(advance) = account.mark_used(used.branch, used.index) else {
            return Ok(false);
        };
        for (index, key_hash) in account.derive_range(advance.branch, advance.new_indices)? {
            let path = KeyPath::new(account.index, advance.branch, index);
            self.paths.put(batch, &key_hash, &path);
            watch.insert(key_hash, path);
        }
        Ok(true)
    }

    /// Reverses one height using its undo record. Spent coins are restored
    /// before created coins are removed so a coin created and spent within
    /// the same block nets out to absent.
    pub(crate) fn revert_height_locked(
        &self,
        inner: &mut Inner,
        height: u32,
    ) -> Result<(), WalletError> {
        let mut batch = WriteBatch::new();
        let mut balance = inner.state.balance;

        if let Some(undo) = self.undo.get(height)? {
            for coin in undo.spent.iter().rev() {
                self.coins.put(&mut batch, &coin.outpoint, &coin.entry);
                balance.coin_count = balance
                    .coin_count
                    .checked_add(1)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.confirmed = balance
                    .confirmed
                    .checked_add(coin.entry.value)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.unconfirmed = balance
                    .unconfirmed
                    .checked_add(coin.entry.value)
                    .ok_or(WalletError::ValueOutOfRange)?;
            }
            for coin in undo.created.iter().rev() {
                self.coins.delete(&mut batch, &coin.outpoint);
                balance.coin_count = balance
                    .coin_count
                    .checked_sub(1)
                    .ok_or(WalletError::Corrupt("coin count underflow"))?;
                balance.confirmed = balance
                    .confirmed
                    .checked_sub(coin.entry.value)
                    .ok_or(WalletError::ValueOutOfRange)?;
                balance.unconfirmed = balance
                    .unconfirmed
                    .checked_sub(coin.entry.value)
                    .ok_or(WalletError::ValueOutOfRange)?;
            }
            for txid in &undo.txids {
                self.txs.delete(&mut batch, txid);
                balance.tx_count = balance
                    .tx_count
                    .checked_sub(1)
                    .ok_or(WalletError::Corrupt("tx count underflow"))?;
            }
            self.undo.delete(&mut batch, height);
        }

        let prev_hash = self
            .meta
            .block_hash(height - 1)?
            .ok_or(WalletError::Corrupt("missing applied block hash"))?;
        self.meta.clear_block_hash(&mut batch, height);

        let mut state = inner.state.clone();
        state.height = height - 1;
        state.tip_hash = prev_hash;
        state.balance = balance;
        self.meta.put_state(&mut batch, &state);
        self.store.write_batch(&batch)?;
        inner.state = state;
        Ok(())
    }
}
