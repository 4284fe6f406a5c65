use walletd_keys::KeyError;
use walletd_primitives::encoding::DecodeError;
use walletd_primitives::Hash256;
use walletd_storage::StoreError;

#[derive(Debug)]
pub enum WalletError {
    /// Requested rescan/rollback target is above the indexed or chain height.
    FutureHeight { requested: u32, current: u32 },
    /// Delivered block does not connect to the wallet tip.
    ChainInconsistency {
        height: u32,
        expected: Hash256,
        found: Hash256,
    },
    NotFound(&'static str),
    RescanInProgress,
    Corrupt(&'static str),
    ValueOutOfRange,
    Store(StoreError),
    Decode(DecodeError),
    Key(KeyError),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::FutureHeight { requested, current } => write!(
                f,
                "cannot roll back to the future (requested {requested}, current {current})"
            ),
            WalletError::ChainInconsistency {
                height,
                expected,
                found,
            } => write!(
                f,
                "block at height {height} does not connect to wallet tip (expected {}, found {})",
                short_hex(expected),
                short_hex(found)
            ),
            WalletError::NotFound(what) => write!(f, "{what} not found"),
            WalletError::RescanInProgress => write!(f, "a rescan is already in progress"),
            WalletError::Corrupt(message) => write!(f, "corrupt wallet database: {message}"),
            WalletError::ValueOutOfRange => write!(f, "value out of range"),
            WalletError::Store(err) => write!(f, "{err}"),
            WalletError::Decode(err) => write!(f, "{err}"),
            WalletError::Key(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Store(err)
    }
}

impl From<DecodeError> for WalletError {
    fn from(err: DecodeError) -> Self {
        WalletError::Decode(err)
    }
}

impl From<KeyError> for WalletError {
    fn from(err: KeyError) -> Self {
        WalletError::Key(err)
    }
}

fn short_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(16);
    for byte in hash.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
