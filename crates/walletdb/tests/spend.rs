use std::sync::{Arc, RwLock};

use walletd_keys::{ExtendedPublicKey, BRANCH_CHANGE, BRANCH_RECEIVE};
use walletd_primitives::{
    Address, Block, BlockHeader, Network, OutPoint, Transaction, TxIn, TxOut,
};
use walletd_storage::memory::MemoryStore;
use walletd_walletdb::{ChainSource, WalletConfig, WalletDb, WalletError};

const BITS: u32 = 0x207f_ffff;
const REWARD: i64 = 2_000_000_000;

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
            transactions: vec![coinbase_tx(0, vec![0x51], 0)],
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

    fn mine(&self, transactions: Vec<Transaction>) -> u32 {
        let mut blocks = self.blocks.write().expect("chain lock");
        let height = blocks.len() as u32;
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
            transactions,
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

fn coinbase_tx(height: u32, script_pubkey: Vec<u8>, value: i64) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey,
        }],
        lock_time: 0,
    }
}

fn branch_script(key: &ExtendedPublicKey, branch: u32, index: u32) -> Vec<u8> {
    let child = key.derive_path(&[branch, index]).expect("derive");
    Address::from_key_hash(child.key_hash()).script_pubkey()
}

fn open_wallet(chain: &Arc<TestChain>) -> (WalletDb<MemoryStore>, ExtendedPublicKey) {
    let store = Arc::new(MemoryStore::new());
    let config = WalletConfig::new("spender", Network::Regtest).with_lookahead(10);
    let chain_source: Arc<dyn ChainSource> = chain.clone();
    let wdb = WalletDb::open(store, chain_source, config).expect("open wallet");
    let key = ExtendedPublicKey::from_seed(&[0x99u8; 32]).expect("seed");
    wdb.create_account(key.clone(), None).expect("create account");
    (wdb, key)
}

#[test]
fn spend_with_change_is_indexed_and_reversible() {
    let chain = Arc::new(TestChain::new());
    let (wdb, key) = open_wallet(&chain);

    // Fund the wallet with one coinbase.
    let funding = coinbase_tx(1, branch_script(&key, BRANCH_RECEIVE, 0), REWARD);
    let funding_txid = funding.txid();
    chain.mine(vec![funding]);
    wdb.connect_block(&chain.block(1), 1).expect("connect");

    let funded = wdb.balance();
    assert_eq!(funded.confirmed, REWARD);
    assert_eq!(funded.coin_count, 1);
    assert_eq!(funded.tx_count, 1);

    // Spend it: most goes to a foreign output, some returns as change.
    let change_value = 600_000_000;
    let spend = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 0),
            script_sig: vec![0x02],
            sequence: u32::MAX,
        }],
        vout: vec![
            TxOut {
                value: REWARD - change_value - 10_000,
                script_pubkey: vec![0x51],
            },
            TxOut {
                value: change_value,
                script_pubkey: branch_script(&key, BRANCH_CHANGE, 0),
            },
        ],
        lock_time: 0,
    };
    let spend_txid = spend.txid();
    chain.mine(vec![coinbase_tx(2, vec![0x51], 0), spend]);
    wdb.connect_block(&chain.block(2), 2).expect("connect");

    let after_spend = wdb.balance();
    assert_eq!(after_spend.confirmed, change_value);
    assert_eq!(after_spend.coin_count, 1);
    assert_eq!(after_spend.tx_count, 2);

    // The funding coin is gone, the change coin exists on the change branch.
    assert!(wdb
        .coin(&OutPoint::new(funding_txid, 0))
        .expect("coin lookup")
        .is_none());
    let change_coin = wdb
        .coin(&OutPoint::new(spend_txid, 1))
        .expect("coin lookup")
        .expect("change coin");
    assert_eq!(change_coin.value, change_value);
    assert!(change_coin.path.is_change());

    let record = wdb
        .transaction(&spend_txid)
        .expect("tx lookup")
        .expect("spend record");
    assert_eq!(record.sent, REWARD);
    assert_eq!(record.received, change_value);

    // Change consumption advanced the change depth.
    assert_eq!(wdb.account(0).expect("account").change_depth, 1);

    // Rolling the spend back restores the funding coin but keeps the
    // widened derivation window.
    wdb.rollback(1).expect("rollback");
    assert_eq!(wdb.balance(), funded);
    assert!(wdb
        .coin(&OutPoint::new(funding_txid, 0))
        .expect("coin lookup")
        .is_some());
    assert!(wdb
        .coin(&OutPoint::new(spend_txid, 1))
        .expect("coin lookup")
        .is_none());
    assert_eq!(wdb.account(0).expect("account").change_depth, 1);

    // Reapplying the same block reproduces the post-spend state.
    wdb.connect_block(&chain.block(2), 2).expect("reconnect");
    assert_eq!(wdb.balance(), after_spend);
}

#[test]
fn chained_spend_within_one_block() {
    let chain = Arc::new(TestChain::new());
    let (wdb, key) = open_wallet(&chain);

    let funding = coinbase_tx(1, branch_script(&key, BRANCH_RECEIVE, 0), REWARD);
    let funding_txid = funding.txid();

    // A second tx in the same block spends the coinbase into a fresh
    // receive address; the intermediate coin must net out correctly.
    let relay = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::new(funding_txid, 0),
            script_sig: vec![0x03],
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: REWARD - 5_000,
            script_pubkey: branch_script(&key, BRANCH_RECEIVE, 1),
        }],
        lock_time: 0,
    };
    let relay_txid = relay.txid();
    chain.mine(vec![funding, relay]);
    wdb.connect_block(&chain.block(1), 1).expect("connect");

    let balance = wdb.balance();
    assert_eq!(balance.confirmed, REWARD - 5_000);
    assert_eq!(balance.coin_count, 1);
    assert_eq!(balance.tx_count, 2);
    assert!(wdb
        .coin(&OutPoint::new(funding_txid, 0))
        .expect("coin lookup")
        .is_none());
    assert!(wdb
        .coin(&OutPoint::new(relay_txid, 0))
        .expect("coin lookup")
        .is_some());

    // Reversal of the whole block leaves nothing behind.
    wdb.rollback(0).expect("rollback");
    let empty = wdb.balance();
    assert_eq!(empty.confirmed, 0);
    assert_eq!(empty.coin_count, 0);
    assert_eq!(empty.tx_count, 0);
    assert!(wdb
        .coin(&OutPoint::new(relay_txid, 0))
        .expect("coin lookup")
        .is_none());
}
