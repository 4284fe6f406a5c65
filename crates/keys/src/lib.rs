//! Watch-only hierarchical key derivation.
//!
//! Accounts hold an extended public key; address windows are derived with
//! non-hardened child derivation only, so a filtered or watch-only wallet
//! can compute every watched address without any signing capability.

use std::sync::OnceLock;

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;

use walletd_primitives::hash::hash160;

/// External (receive) address branch.
pub const BRANCH_RECEIVE: u32 = 0;
/// Internal (change) address branch.
pub const BRANCH_CHANGE: u32 = 1;

/// Highest non-hardened child index; the derivation ceiling.
pub const MAX_CHILD_INDEX: u32 = 0x7fff_ffff;

const MASTER_SEED_TAG: &[u8] = b"walletd seed";

#[derive(Debug, PartialEq, Eq)]
pub enum KeyError {
    HardenedChild(u32),
    InvalidSeed,
    InvalidTweak,
    InvalidKeyBytes,
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::HardenedChild(index) => {
                write!(f, "child index {index} requires hardened derivation")
            }
            KeyError::InvalidSeed => write!(f, "seed produced an invalid master key"),
            KeyError::InvalidTweak => write!(f, "derived tweak is out of range"),
            KeyError::InvalidKeyBytes => write!(f, "invalid extended key bytes"),
        }
    }
}

impl std::error::Error for KeyError {}

fn secp() -> &'static Secp256k1<secp256k1::All> {
    static SECP: OnceLock<Secp256k1<secp256k1::All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}

fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// An extended public key: a compressed secp256k1 point plus a chain code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    public_key: PublicKey,
    chain_code: [u8; 32],
}

impl ExtendedPublicKey {
    pub fn from_parts(public_key: PublicKey, chain_code: [u8; 32]) -> Self {
        Self {
            public_key,
            chain_code,
        }
    }

    /// Derives the master key for a seed. Only used at wallet creation;
    /// the resulting secret never leaves this function.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        let digest = hmac_sha512(MASTER_SEED_TAG, &[seed]);
        let secret = SecretKey::from_slice(&digest[..32]).map_err(|_| KeyError::InvalidSeed)?;
        let public_key = PublicKey::from_secret_key(secp(), &secret);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);
        Ok(Self {
            public_key,
            chain_code,
        })
    }

    /// Non-hardened CKDpub child derivation.
    pub fn derive_child(&self, index: u32) -> Result<Self, KeyError> {
        if index > MAX_CHILD_INDEX {
            return Err(KeyError::HardenedChild(index));
        }
        let digest = hmac_sha512(
            &self.chain_code,
            &[&self.public_key.serialize(), &index.to_be_bytes()],
        );
        let tweak_bytes: [u8; 32] = digest[..32].try_into().expect("hmac output length");
        let tweak = Scalar::from_be_bytes(tweak_bytes).map_err(|_| KeyError::InvalidTweak)?;
        let public_key = self
            .public_key
            .add_exp_tweak(secp(), &tweak)
            .map_err(|_| KeyError::InvalidTweak)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);
        Ok(Self {
            public_key,
            chain_code,
        })
    }

    pub fn derive_path(&self, path: &[u32]) -> Result<Self, KeyError> {
        let mut key = self.clone();
        for index in path {
            key = key.derive_child(*index)?;
        }
        Ok(key)
    }

    /// hash160 of the compressed public key; the watch-set member.
    pub fn key_hash(&self) -> [u8; 20] {
        hash160(&self.public_key.serialize())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..33].copy_from_slice(&self.public_key.serialize());
        out[33..].copy_from_slice(&self.chain_code);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 65 {
            return Err(KeyError::InvalidKeyBytes);
        }
        let public_key =
            PublicKey::from_slice(&bytes[..33]).map_err(|_| KeyError::InvalidKeyBytes)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&bytes[33..]);
        Ok(Self {
            public_key,
            chain_code,
        })
    }
}

/// Location of a derived key within a wallet: account, branch, index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct KeyPath {
    pub account: u32,
    pub branch: u32,
    pub index: u32,
}

impl KeyPath {
    pub fn new(account: u32, branch: u32, index: u32) -> Self {
        Self {
            account,
            branch,
            index,
        }
    }

    pub fn is_change(&self) -> bool {
        self.branch == BRANCH_CHANGE
    }
}
