//! The wallet database: single-writer state over a durable key-value store,
//! live block application, rescan orchestration, and rollback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use walletd_keys::{ExtendedPublicKey, KeyPath, BRANCH_CHANGE, BRANCH_RECEIVE};
use walletd_primitives::{Address, Block, BlockHeader, BloomFilter, Hash256, OutPoint, Transaction};
use walletd_storage::{Column, KeyValueStore, WriteBatch};

use crate::account::{Account, AccountIndex};
use crate::chain::ChainSource;
use crate::coins::{CoinEntry, CoinIndex};
use crate::config::{WalletConfig, MAX_LOOKAHEAD};
use crate::error::WalletError;
use crate::events::{EventHandler, WalletEvent};
use crate::meta::{Balance, MetaIndex, WalletState};
use crate::paths::PathIndex;
use crate::txdb::{TxIndex, TxRecord};
use crate::undo::UndoIndex;
use crate::watch::WatchSet;

pub(crate) struct Inner {
    pub state: WalletState,
    pub accounts: Vec<Account>,
    pub watch: WatchSet,
}

pub struct WalletDb<S> {
    pub(crate) config: WalletConfig,
    pub(crate) store: Arc<S>,
    chain: Arc<dyn ChainSource>,
    pub(crate) coins: CoinIndex<Arc<S>>,
    pub(crate) paths: PathIndex<Arc<S>>,
    pub(crate) txs: TxIndex<Arc<S>>,
    pub(crate) undo: UndoIndex<Arc<S>>,
    pub(crate) accounts_index: AccountIndex<Arc<S>>,
    pub(crate) meta: MetaIndex<Arc<S>>,
    inner: RwLock<Inner>,
    listeners: Mutex<Vec<EventHandler>>,
    rescan_active: AtomicBool,
    abort_requested: AtomicBool,
}

impl<S: KeyValueStore> WalletDb<S> {
    pub fn open(
        store: Arc<S>,
        chain: Arc<dyn ChainSource>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        if config.lookahead == 0 || config.lookahead > MAX_LOOKAHEAD {
            return Err(WalletError::ValueOutOfRange);
        }

        let meta = MetaIndex::new(Arc::clone(&store));
        let paths = PathIndex::new(Arc::clone(&store));
        let accounts_index = AccountIndex::new(Arc::clone(&store));

        let state = match meta.state()? {
            Some(state) => state,
            None => {
                let genesis = chain
                    .block_at(0)?
                    .ok_or(WalletError::NotFound("genesis block"))?;
                let state = WalletState::genesis(genesis.hash());
                let mut batch = WriteBatch::new();
                meta.put_state(&mut batch, &state);
                meta.put_block_hash(&mut batch, 0, &state.tip_hash);
                store.write_batch(&batch)?;
                state
            }
        };

        let accounts = accounts_index.all()?;

        let mut watched = Vec::new();
        paths.for_each(&mut |key_hash, path| watched.push((key_hash, path)))?;
        let mut watch = WatchSet::with_capacity(
            watched.len() as u32,
            config.filter_rate,
            config.filter_tweak,
        );
        for (key_hash, path) in watched {
            watch.insert(key_hash, path);
        }

        walletd_log::log_info!(
            "wallet {} opened at height {} ({} accounts, {} watched keys)",
            config.wallet_id,
            state.height,
            accounts.len(),
            watch.len(),
        );

        Ok(Self {
            config,
            coins: CoinIndex::new(Arc::clone(&store)),
            txs: TxIndex::new(Arc::clone(&store)),
            undo: UndoIndex::new(Arc::clone(&store)),
            paths,
            accounts_index,
            meta,
            store,
            chain,
            inner: RwLock::new(Inner {
                state,
                accounts,
                watch,
            }),
            listeners: Mutex::new(Vec::new()),
            rescan_active: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
        })
    }

    /// Creates a watch-only account. `lookahead` falls back to the wallet
    /// default; it is fixed for the lifetime of the account.
    pub fn create_account(
        &self,
        key: ExtendedPublicKey,
        lookahead: Option<u32>,
    ) -> Result<u32, WalletError> {
        let lookahead = lookahead.unwrap_or(self.config.lookahead);
        if lookahead == 0 || lookahead > MAX_LOOKAHEAD {
            return Err(WalletError::ValueOutOfRange);
        }

        let mut inner = self.inner.write().expect("wallet lock");
        let index = inner.accounts.len() as u32;
        let account = Account::new(index, key, lookahead);

        let mut batch = WriteBatch::new();
        for branch in [BRANCH_RECEIVE, BRANCH_CHANGE] {
            let window = account.derive_range(branch, 0..account.window_end(branch))?;
            for (child, key_hash) in window {
                let path = KeyPath::new(index, branch, child);
                self.paths.put(&mut batch, &key_hash, &path);
                inner.watch.insert(key_hash, path);
            }
        }
        self.accounts_index.put(&mut batch, &account);
        self.store.write_batch(&batch)?;
        inner.accounts.push(account);

        walletd_log::log_info!(
            "created account {index} on wallet {} (lookahead {lookahead})",
            self.config.wallet_id,
        );
        Ok(index)
    }

    pub fn wallet_id(&self) -> &str {
        &self.config.wallet_id
    }

    pub fn height(&self) -> u32 {
        self.inner.read().expect("wallet lock").state.height
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.inner.read().expect("wallet lock").state.tip_hash
    }

    pub fn balance(&self) -> Balance {
        self.inner.read().expect("wallet lock").state.balance
    }

    /// Lowest height flagged for recovery after a lookahead overrun, if any.
    pub fn recovery_height(&self) -> Option<u32> {
        self.inner.read().expect("wallet lock").state.recovery_height
    }

    pub fn account(&self, index: u32) -> Option<Account> {
        self.inner
            .read()
            .expect("wallet lock")
            .accounts
            .get(index as usize)
            .cloned()
    }

    /// Next unused receive address of an account.
    pub fn receive_address(&self, account: u32) -> Result<Address, WalletError> {
        let inner = self.inner.read().expect("wallet lock");
        let account = inner
            .accounts
            .get(account as usize)
            .ok_or(WalletError::NotFound("account"))?;
        let key_hash = account.derive_key_hash(BRANCH_RECEIVE, account.receive_depth)?;
        Ok(Address::from_key_hash(key_hash))
    }

    /// Snapshot of the shared filter for upstream filtered-sync providers.
    pub fn filter(&self) -> BloomFilter {
        self.inner.read().expect("wallet lock").watch.filter().clone()
    }

    pub fn transaction(&self, txid: &Hash256) -> Result<Option<TxRecord>, WalletError> {
        self.txs.get(txid)
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Result<Option<CoinEntry>, WalletError> {
        self.coins.get(outpoint)
    }

    pub fn subscribe(&self, handler: EventHandler) {
        self.listeners.lock().expect("listener lock").push(handler);
    }

    pub(crate) fn emit(&self, events: &[WalletEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().expect("listener lock");
        for event in events {
            for listener in listeners.iter() {
                listener(event);
            }
        }
    }

    /// Live delivery of a full block from the chain collaborator.
    pub fn connect_block(&self, block: &Block, height: u32) -> Result<(), WalletError> {
        self.connect_inner(&block.header, height, &block.transactions, false)
    }

    /// Filtered/SPV delivery: only transactions matching the upstream
    /// filter are present. Window extensions during such a block flag the
    /// height for recovery, since the upstream filter predates them.
    pub fn connect_filtered_block(
        &self,
        header: &BlockHeader,
        height: u32,
        txs: &[Transaction],
    ) -> Result<(), WalletError> {
        self.connect_inner(header, height, txs, true)
    }

    fn connect_inner(
        &self,
        header: &BlockHeader,
        height: u32,
        txs: &[Transaction],
        filtered: bool,
    ) -> Result<(), WalletError> {
        if self.rescan_active.load(Ordering::SeqCst) {
            // The rescan loop re-reads the chain height every step, so it
            // covers this block on its own.
            walletd_log::log_debug!("deferring block at height {height} during active rescan");
            return Ok(());
        }

        let behind = {
            let mut inner = self.inner.write().expect("wallet lock");
            let indexed = inner.state.height;
            if height == indexed + 1 {
                let events = self.apply_block_locked(&mut inner, header, height, txs, filtered)?;
                drop(inner);
                self.emit(&events);
                return Ok(());
            }
            if height <= indexed {
                let known = self.meta.block_hash(height)?;
                if known == Some(header.hash()) {
                    return Ok(());
                }
                return Err(WalletError::ChainInconsistency {
                    height,
                    expected: known.unwrap_or([0u8; 32]),
                    found: header.hash(),
                });
            }
            indexed
        };

        walletd_log::log_info!(
            "wallet {} behind chain (indexed {behind}, received {height}); rescanning to cover the gap",
            self.config.wallet_id,
        );
        self.rescan(behind)
    }

    /// Replays blocks `from+1..` through the indexer, rolling back first if
    /// `from` is below the indexed height. Completion is reaching the chain
    /// height as observed at each step, since the chain may keep growing.
    pub fn rescan(&self, from: u32) -> Result<(), WalletError> {
        if self.rescan_active.swap(true, Ordering::SeqCst) {
            return Err(WalletError::RescanInProgress);
        }
        self.abort_requested.store(false, Ordering::SeqCst);
        let result = self.run_rescan(from);
        self.abort_requested.store(false, Ordering::SeqCst);
        self.rescan_active.store(false, Ordering::SeqCst);
        result
    }

    fn run_rescan(&self, from: u32) -> Result<(), WalletError> {
        let indexed = self.height();
        if from > indexed {
            return Err(WalletError::FutureHeight {
                requested: from,
                current: indexed,
            });
        }
        let chain_height = self.chain.current_height()?;
        if from > chain_height {
            return Err(WalletError::FutureHeight {
                requested: from,
                current: chain_height,
            });
        }

        walletd_log::log_info!(
            "rescanning wallet {} from height {from} (indexed {indexed}, chain {chain_height})",
            self.config.wallet_id,
        );

        if from < indexed {
            self.rollback_to(from)?;
        }
        self.clear_recovery_below(from)?;

        loop {
            if self.abort_requested.load(Ordering::SeqCst) {
                walletd_log::log_info!("rescan aborted at height {}", self.height());
                return Ok(());
            }
            let next = self.height() + 1;
            if next > self.chain.current_height()? {
                break;
            }
            let block = self
                .chain
                .block_at(next)?
                .ok_or(WalletError::NotFound("block"))?;
            let events = {
                let mut inner = self.inner.write().expect("wallet lock");
                self.apply_block_locked(&mut inner, &block.header, next, &block.transactions, false)?
            };
            self.emit(&events);
        }

        walletd_log::log_info!("rescan finished at height {}", self.height());
        Ok(())
    }

    /// Requests a cooperative stop of the active rescan. Checked between
    /// blocks, never mid-block; idempotent.
    pub fn abort_rescan(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    /// Reverts indexed state to `target`, undoing every balance and history
    /// effect above it. The watch set and derivation depths are kept.
    pub fn rollback(&self, target: u32) -> Result<(), WalletError> {
        if self.rescan_active.load(Ordering::SeqCst) {
            return Err(WalletError::RescanInProgress);
        }
        self.rollback_to(target)
    }

    fn rollback_to(&self, target: u32) -> Result<(), WalletError> {
        let mut inner = self.inner.write().expect("wallet lock");
        let indexed = inner.state.height;
        if target > indexed {
            return Err(WalletError::FutureHeight {
                requested: target,
                current: indexed,
            });
        }
        if target == indexed {
            return Ok(());
        }

        walletd_log::log_info!(
            "rolling back wallet {} from height {indexed} to {target}",
            self.config.wallet_id,
        );
        for height in ((target + 1)..=indexed).rev() {
            self.revert_height_locked(&mut inner, height)?;
        }
        drop(inner);
        self.emit(&[WalletEvent::HeightChanged { height: target }]);
        Ok(())
    }

    // A rescan that replays the flagged range with the widened window
    // supersedes the recovery mark.
    fn clear_recovery_below(&self, from: u32) -> Result<(), WalletError> {
        let mut inner = self.inner.write().expect("wallet lock");
        match inner.state.recovery_height {
            Some(flagged) if from < flagged => {
                let mut state = inner.state.clone();
                state.recovery_height = None;
                let mut batch = WriteBatch::new();
                self.meta.put_state(&mut batch, &state);
                self.store.write_batch(&batch)?;
                inner.state = state;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Drops every wallet record and the watch set, restoring a freshly
    /// created wallet against the same chain data. Accounts must be
    /// re-created before rescanning.
    pub fn wipe(&self) -> Result<(), WalletError> {
        if self.rescan_active.load(Ordering::SeqCst) {
            return Err(WalletError::RescanInProgress);
        }
        let mut inner = self.inner.write().expect("wallet lock");
        let genesis = self
            .chain
            .block_at(0)?
            .ok_or(WalletError::NotFound("genesis block"))?;

        let mut batch = WriteBatch::new();
        for column in Column::ALL {
            for (key, _) in self.store.scan_prefix(column, &[])? {
                batch.delete(column, key);
            }
        }
        let state = WalletState::genesis(genesis.hash());
        self.meta.put_state(&mut batch, &state);
        self.meta.put_block_hash(&mut batch, 0, &state.tip_hash);
        self.store.write_batch(&batch)?;

        inner.state = state;
        inner.accounts.clear();
        inner.watch.reset();
        walletd_log::log_info!("wallet {} wiped", self.config.wallet_id);
        Ok(())
    }
}
