use std::sync::{Arc, RwLock};

use walletd_keys::{ExtendedPublicKey, BRANCH_RECEIVE};
use walletd_primitives::{
    Address, Block, BlockHeader, Network, OutPoint, Transaction, TxIn, TxOut,
};
use walletd_storage::memory::MemoryStore;
use walletd_walletdb::{ChainSource, WalletConfig, WalletDb, WalletError};

const BITS: u32 = 0x207f_ffff;

// How many more txs per block we generate beyond the lookahead value.
const LOOKAHEAD: u32 = 10;
const EXTRA: u32 = 10;
const TXS_PER_BLOCK: u32 = LOOKAHEAD + EXTRA;
const BLOCKS: u32 = 4;
const VALUE: i64 = 100_000;
const HARD_FEE: i64 = 10_000;

struct TestChain {
    blocks: RwLock<Vec<Block>>,
}

impl TestChain {
    fn new() -> Self {
        let genesis = Block {
            header: BlockHeader {
                version: 1,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 1_700_000_000,
                bits: BITS,
                nonce: 0,
            },
            transactions: vec![coinbase_tx(0, vec![0x51])],
        };
        Self {
            blocks: RwLock::new(vec![genesis]),
        }
    }

    fn height(&self) -> u32 {
        (self.blocks.read().expect("chain lock").len() - 1) as u32
    }

    fn block(&self, height: u32) -> Block {
        self.blocks.read().expect("chain lock")[height as usize].clone()
    }

    fn mine(&self, mut transactions: Vec<Transaction>) -> u32 {
        let mut blocks = self.blocks.write().expect("chain lock");
        let height = blocks.len() as u32;
        let mut txs = vec![coinbase_tx(height, vec![0x51])];
        txs.append(&mut transactions);
        let header = BlockHeader {
            version: 1,
            prev_block: blocks.last().expect("genesis").hash(),
            merkle_root: [0u8; 32],
            time: 1_700_000_000 + height,
            bits: BITS,
            nonce: height,
        };
        blocks.push(Block {
            header,
            transactions: txs,
        });
        height
    }
}

impl ChainSource for TestChain {
    fn current_height(&self) -> Result<u32, WalletError> {
        Ok(self.height())
    }

    fn block_at(&self, height: u32) -> Result<Option<Block>, WalletError> {
        let blocks = self.blocks.read().expect("chain lock");
        Ok(blocks.get(height as usize).cloned())
    }
}

fn coinbase_tx(height: u32, script_pubkey: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 0,
            script_pubkey,
        }],
        lock_time: 0,
    }
}

// A funding transaction from an unrelated source, paying `VALUE - HARD_FEE`
// to one wallet address (the sender subtracts the fee from the output).
fn fund_tx(tag: u64, script_pubkey: Vec<u8>) -> Transaction {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&tag.to_le_bytes());
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::new(hash, 0),
            script_sig: vec![0x01],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: VALUE - HARD_FEE,
            script_pubkey,
        }],
        lock_time: 0,
    }
}

fn account_key() -> ExtendedPublicKey {
    ExtendedPublicKey::from_seed(&[0x07u8; 32]).expect("seed")
}

fn receive_script(key: &ExtendedPublicKey, index: u32) -> Vec<u8> {
    let child = key.derive_path(&[BRANCH_RECEIVE, index]).expect("derive");
    Address::from_key_hash(child.key_hash()).script_pubkey()
}

fn open_wallet(chain: &Arc<TestChain>, wallet_id: &str) -> Arc<WalletDb<MemoryStore>> {
    let store = Arc::new(MemoryStore::new());
    let config = WalletConfig::new(wallet_id, Network::Regtest).with_lookahead(LOOKAHEAD);
    let chain_source: Arc<dyn ChainSource> = chain.clone();
    let wdb = Arc::new(WalletDb::open(store, chain_source, config).expect("open wallet"));
    wdb.create_account(account_key(), None)
        .expect("create account");
    wdb
}

// Pays more distinct future addresses per block than the lookahead covers,
// so every block forces the window past its starting boundary.
fn mine_funding_blocks(chain: &TestChain) {
    let key = account_key();
    let mut index = 0u32;
    for _ in 0..BLOCKS {
        let mut txs = Vec::with_capacity(TXS_PER_BLOCK as usize);
        for _ in 0..TXS_PER_BLOCK {
            txs.push(fund_tx(index as u64, receive_script(&key, index)));
            index += 1;
        }
        chain.mine(txs);
    }
}

fn expected_balance() -> i64 {
    (BLOCKS * TXS_PER_BLOCK) as i64 * (VALUE - HARD_FEE)
}

#[test]
fn live_sync_reaches_expected_balance() {
    let chain = Arc::new(TestChain::new());
    let wdb = open_wallet(&chain, "live");
    mine_funding_blocks(&chain);

    for height in 1..=chain.height() {
        wdb.connect_block(&chain.block(height), height)
            .expect("connect block");
    }

    assert_eq!(wdb.height(), chain.height());
    let balance = wdb.balance();
    assert_eq!(balance.tx_count, (BLOCKS * TXS_PER_BLOCK) as u64);
    assert_eq!(balance.confirmed, expected_balance());

    // In-order full-block delivery extends the window ahead of every
    // payment, so nothing was missed and no recovery is flagged.
    assert_eq!(wdb.recovery_height(), None);

    // Depth advanced past every paid index and the window stays ahead.
    let account = wdb.account(0).expect("account");
    assert_eq!(account.receive_depth, BLOCKS * TXS_PER_BLOCK);
}

#[test]
fn fresh_wallet_rescan_matches_live_sync() {
    let chain = Arc::new(TestChain::new());
    let live = open_wallet(&chain, "live");
    mine_funding_blocks(&chain);

    for height in 1..=chain.height() {
        live.connect_block(&chain.block(height), height)
            .expect("connect block");
    }

    // Re-derive the same wallet from scratch and replay the whole chain.
    let rescanned = open_wallet(&chain, "rescan");
    assert_eq!(rescanned.balance().confirmed, 0);
    rescanned.rescan(0).expect("rescan");

    assert_eq!(rescanned.height(), live.height());
    assert_eq!(rescanned.balance(), live.balance());
}

#[test]
fn wiped_wallet_rescans_to_identical_balance() {
    let chain = Arc::new(TestChain::new());
    let wdb = open_wallet(&chain, "wipe");
    mine_funding_blocks(&chain);

    for height in 1..=chain.height() {
        wdb.connect_block(&chain.block(height), height)
            .expect("connect block");
    }
    let synced = wdb.balance();
    assert_eq!(synced.confirmed, expected_balance());

    // Recreating the wallet against the same chain data requires dropping
    // the watch set and filter entirely, otherwise it would "already know"
    // every key in advance.
    wdb.wipe().expect("wipe");
    assert_eq!(wdb.height(), 0);
    assert_eq!(wdb.balance().confirmed, 0);
    assert!(wdb.filter().is_empty());

    wdb.create_account(account_key(), None)
        .expect("recreate account");
    wdb.rescan(0).expect("rescan");

    assert_eq!(wdb.balance(), synced);
    assert_eq!(wdb.height(), chain.height());
}

#[test]
fn out_of_order_payment_past_window_is_flagged_and_recovered() {
    let chain = Arc::new(TestChain::new());
    let wdb = open_wallet(&chain, "ooo");

    // The first tx pays an index beyond the current window; a later tx in
    // the same block extends the window over it, so the first output was
    // already passed by the time it became watchable.
    let key = account_key();
    chain.mine(vec![
        fund_tx(0, receive_script(&key, 12)),
        fund_tx(1, receive_script(&key, 5)),
    ]);
    wdb.connect_block(&chain.block(1), 1).expect("connect block");

    let live = wdb.balance();
    assert_eq!(live.tx_count, 1);
    assert_eq!(live.confirmed, VALUE - HARD_FEE);
    assert_eq!(wdb.recovery_height(), Some(1));

    wdb.rescan(0).expect("rescan");
    let recovered = wdb.balance();
    assert_eq!(recovered.tx_count, 2);
    assert_eq!(recovered.confirmed, 2 * (VALUE - HARD_FEE));
    assert_eq!(wdb.recovery_height(), None);
}

#[test]
fn rollback_then_rescan_round_trips() {
    let chain = Arc::new(TestChain::new());
    let wdb = open_wallet(&chain, "roundtrip");
    mine_funding_blocks(&chain);

    for height in 1..=chain.height() {
        wdb.connect_block(&chain.block(height), height)
            .expect("connect block");
    }
    let before = wdb.balance();

    wdb.rollback(0).expect("rollback");
    assert_eq!(wdb.balance().confirmed, 0);

    // Rollback keeps the derivation window, so the replay sees every
    // address from the first pass.
    let account = wdb.account(0).expect("account");
    assert_eq!(account.receive_depth, BLOCKS * TXS_PER_BLOCK);

    wdb.rescan(0).expect("rescan");
    assert_eq!(wdb.balance(), before);
}
