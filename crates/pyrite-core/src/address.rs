//! Base58Check address encoding.
//!
//! An address is `Base58(version ‖ pubkey_hash ‖ checksum)` where the
//! pubkey hash is RIPEMD-160(SHA-256(public key)) and the checksum is the
//! first four bytes of a double SHA-256 over `version ‖ pubkey_hash`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{double_sha256, PublicKey};
use crate::error::AddressError;
use crate::types::Hash160;

/// Current address version byte.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Checksum length in bytes.
pub const CHECKSUM_LENGTH: usize = 4;

/// A checksum-protected pubkey hash in its decoded form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    version: u8,
    pubkey_hash: Hash160,
}

impl Address {
    pub fn from_pubkey_hash(pubkey_hash: Hash160) -> Self {
        Self {
            version: ADDRESS_VERSION,
            pubkey_hash,
        }
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_pubkey_hash(public_key.pubkey_hash())
    }

    /// The pubkey hash outputs lock to.
    pub fn pubkey_hash(&self) -> Hash160 {
        self.pubkey_hash
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Encode as a Base58 string.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LENGTH);
        payload.push(self.version);
        payload.extend_from_slice(self.pubkey_hash.as_bytes());
        payload.extend_from_slice(&checksum(&payload));
        bs58::encode(payload).into_string()
    }

    /// Decode a Base58 string, verifying length, version, and checksum.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let payload = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;

        if payload.len() != 1 + 20 + CHECKSUM_LENGTH {
            return Err(AddressError::InvalidLength(payload.len()));
        }

        let (body, stored) = payload.split_at(payload.len() - CHECKSUM_LENGTH);
        if checksum(body) != stored {
            return Err(AddressError::InvalidChecksum);
        }

        let version = body[0];
        if version != ADDRESS_VERSION {
            return Err(AddressError::InvalidVersion(version));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&body[1..]);
        Ok(Self {
            version,
            pubkey_hash: Hash160(hash),
        })
    }

    /// Whether `s` decodes to a well-formed address.
    pub fn is_valid(s: &str) -> bool {
        Self::decode(s).is_ok()
    }
}

/// First four bytes of double SHA-256 over the versioned payload.
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let digest = double_sha256(payload);
    let mut out = [0u8; CHECKSUM_LENGTH];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LENGTH]);
    out
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}
