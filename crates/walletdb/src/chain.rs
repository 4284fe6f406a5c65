//! Interface to the external chain/node collaborator.
//!
//! The wallet trusts delivered blocks as valid and canonical at the moment
//! of delivery. Transient fetch failures are the collaborator's to retry; a
//! missing block surfaces as `NotFound` and the caller re-invokes.

use walletd_primitives::Block;

use crate::error::WalletError;

pub trait ChainSource: Send + Sync {
    /// Current best height of the chain, re-read at every rescan step since
    /// the chain may keep growing.
    fn current_height(&self) -> Result<u32, WalletError>;

    /// Full block at `height`, or `None` if the chain does not have one.
    fn block_at(&self, height: u32) -> Result<Option<Block>, WalletError>;
}
