//! Chain primitives as the wallet sees them: binary encoding, hashes,
//! outpoints, transactions, blocks, addresses, and the bloom filter used
//! for filtered sync.

pub mod address;
pub mod block;
pub mod bloom;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

pub use address::{Address, AddressError};
pub use block::{Block, BlockHeader};
pub use bloom::BloomFilter;
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
