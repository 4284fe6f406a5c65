//! Wallet notifications, delivered strictly in block order and, within a
//! block, in transaction order, never before the block's batch commits.

use walletd_primitives::Hash256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxDetails {
    pub txid: Hash256,
    pub block_index: u32,
    pub received: i64,
    pub sent: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    /// A block confirmed a wallet-relevant transaction.
    Confirmed {
        wallet_id: String,
        tx: TxDetails,
        height: u32,
    },
    /// The indexed height changed (block applied or rollback finished).
    HeightChanged { height: u32 },
}

pub type EventHandler = Box<dyn Fn(&WalletEvent) + Send + Sync>;
