//! Bech32 address encoding over versioned 20-byte key-hash programs.

use bech32::{segwit, Fe32, Hrp};

use crate::Network;

pub const KEY_HASH_LEN: usize = 20;

#[derive(Debug, PartialEq, Eq)]
pub enum AddressError {
    InvalidVersion,
    InvalidLength,
    InvalidEncoding,
    WrongNetwork,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidVersion => write!(f, "invalid address version"),
            AddressError::InvalidLength => write!(f, "invalid address program length"),
            AddressError::InvalidEncoding => write!(f, "invalid bech32 encoding"),
            AddressError::WrongNetwork => write!(f, "address prefix does not match network"),
        }
    }
}

impl std::error::Error for AddressError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Address {
    pub version: u8,
    pub hash: [u8; KEY_HASH_LEN],
}

impl Address {
    pub fn from_key_hash(hash: [u8; KEY_HASH_LEN]) -> Self {
        Self { version: 0, hash }
    }

    /// Script pubkey layout: version byte, push length, program bytes.
    pub fn script_pubkey(&self) -> Vec<u8> {
        let mut script = Vec::with_capacity(2 + KEY_HASH_LEN);
        script.push(self.version);
        script.push(KEY_HASH_LEN as u8);
        script.extend_from_slice(&self.hash);
        script
    }

    pub fn from_script_pubkey(script: &[u8]) -> Option<Self> {
        if script.len() != 2 + KEY_HASH_LEN {
            return None;
        }
        if script[0] > 31 || script[1] as usize != KEY_HASH_LEN {
            return None;
        }
        let mut hash = [0u8; KEY_HASH_LEN];
        hash.copy_from_slice(&script[2..]);
        Some(Self {
            version: script[0],
            hash,
        })
    }

    pub fn encode(&self, network: Network) -> Result<String, AddressError> {
        let version = Fe32::try_from(self.version).map_err(|_| AddressError::InvalidVersion)?;
        segwit::encode(hrp(network), version, &self.hash)
            .map_err(|_| AddressError::InvalidEncoding)
    }

    pub fn parse(input: &str, network: Network) -> Result<Self, AddressError> {
        let (found_hrp, version, program) =
            segwit::decode(input).map_err(|_| AddressError::InvalidEncoding)?;
        if found_hrp != hrp(network) {
            return Err(AddressError::WrongNetwork);
        }
        if program.len() != KEY_HASH_LEN {
            return Err(AddressError::InvalidLength);
        }
        let mut hash = [0u8; KEY_HASH_LEN];
        hash.copy_from_slice(&program);
        Ok(Self {
            version: version.to_u8(),
            hash,
        })
    }
}

fn hrp(network: Network) -> Hrp {
    match network {
        Network::Mainnet => Hrp::parse_unchecked("wd"),
        Network::Testnet => Hrp::parse_unchecked("tw"),
        Network::Regtest => Hrp::parse_unchecked("rw"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_round_trip() {
        let address = Address::from_key_hash([0x11; 20]);
        let script = address.script_pubkey();
        assert_eq!(script.len(), 22);
        assert_eq!(Address::from_script_pubkey(&script), Some(address));
    }

    #[test]
    fn rejects_malformed_scripts() {
        assert_eq!(Address::from_script_pubkey(&[0x00, 0x14]), None);
        // push length disagrees with program length
        let mut script = Address::from_key_hash([0x22; 20]).script_pubkey();
        script[1] = 0x13;
        assert_eq!(Address::from_script_pubkey(&script), None);
    }

    #[test]
    fn encode_parse_round_trip() {
        let address = Address::from_key_hash([0x33; 20]);
        let encoded = address.encode(Network::Regtest).expect("encode");
        assert!(encoded.starts_with("rw1"));
        assert_eq!(Address::parse(&encoded, Network::Regtest), Ok(address));
        assert_eq!(
            Address::parse(&encoded, Network::Mainnet),
            Err(AddressError::WrongNetwork)
        );
    }
}
