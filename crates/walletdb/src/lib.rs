//! Wallet synchronization/indexing core.
//!
//! Tracks spendable outputs against a chain the wallet does not control:
//! an incremental block indexer with per-height undo records, bounded
//! lookahead key derivation, a bloom-backed watch set for filtered sync,
//! and a resumable, abortable rescan controller. Storage goes through the
//! `walletd-storage` key-value trait; chain data comes from a
//! [`ChainSource`] collaborator.

pub mod account;
pub mod chain;
pub mod coins;
pub mod config;
pub mod error;
pub mod events;
mod indexer;
pub mod meta;
pub mod paths;
pub mod txdb;
pub mod undo;
pub mod walletdb;
pub mod watch;

pub use chain::ChainSource;
pub use config::{WalletConfig, DEFAULT_FILTER_RATE, DEFAULT_LOOKAHEAD, MAX_LOOKAHEAD};
pub use error::WalletError;
pub use events::{EventHandler, TxDetails, WalletEvent};
pub use meta::{Balance, WalletState};
pub use walletdb::WalletDb;
