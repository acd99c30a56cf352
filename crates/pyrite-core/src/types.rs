//! Core protocol types: hashes, transactions, blocks.
//!
//! All values are hashed over their canonical [`codec`](crate::codec)
//! encoding, so field order and integer widths here are part of the wire
//! protocol.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::constants::{COINBASE_REWARD, GENESIS_DATA};
use crate::crypto::sha256;
use crate::error::PyriteError;

/// A 32-byte SHA-256 hash: transaction ids, block hashes, merkle roots.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Marks the genesis predecessor and coinbase outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte RIPEMD-160(SHA-256(pubkey)) digest locking an output.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Hash160 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to one output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Id of the transaction holding the referenced output.
    pub txid: Hash256,
    /// Index of the output within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint marking a coinbase input.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null for coinbase inputs.
    pub previous_output: OutPoint,
    /// ECDSA P-256 signature as r‖s (64 bytes). Empty on coinbase.
    pub signature: Vec<u8>,
    /// Spender's raw public key as X‖Y (64 bytes). On coinbase inputs this
    /// field carries arbitrary payload instead (genesis message, miner tag).
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Whether this input's key hashes to the given output lock.
    pub fn uses_key(&self, pubkey_hash: &Hash160) -> bool {
        crate::crypto::hash_pubkey(&self.public_key) == *pubkey_hash
    }
}

/// A transaction output locking an amount to a pubkey hash.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Amount in whole coins.
    pub value: u64,
    /// RIPEMD-160(SHA-256(public key)) of the recipient.
    pub pubkey_hash: Hash160,
}

impl TxOutput {
    pub fn is_locked_with_key(&self, pubkey_hash: &Hash160) -> bool {
        self.pubkey_hash == *pubkey_hash
    }
}

/// An atomic value transfer.
///
/// `id` is SHA-256 of the canonical encoding with `id` itself zeroed; any
/// mutation of inputs or outputs requires [`finalize`](Self::finalize).
/// Once placed into a block a transaction is frozen.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build a coinbase transaction minting the block reward to `to`.
    ///
    /// With no explicit payload, 20 random bytes keep coinbase ids unique
    /// across blocks rewarding the same address.
    pub fn new_coinbase(
        to: &crate::address::Address,
        payload: Option<Vec<u8>>,
    ) -> Result<Self, PyriteError> {
        let payload = match payload {
            Some(data) => data,
            None => {
                let mut data = [0u8; 20];
                rand::thread_rng().fill_bytes(&mut data);
                data.to_vec()
            }
        };

        let mut tx = Self {
            id: Hash256::ZERO,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: Vec::new(),
                public_key: payload,
            }],
            outputs: vec![TxOutput {
                value: COINBASE_REWARD,
                pubkey_hash: to.pubkey_hash(),
            }],
        };
        tx.finalize()?;
        Ok(tx)
    }

    /// The genesis coinbase, carrying the fixed genesis message.
    pub fn genesis_coinbase(to: &crate::address::Address) -> Result<Self, PyriteError> {
        Self::new_coinbase(to, Some(GENESIS_DATA.to_vec()))
    }

    /// True iff this transaction mints coins: one input, null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Compute the id over the canonical encoding with `id` zeroed.
    pub fn compute_id(&self) -> Result<Hash256, PyriteError> {
        let mut copy = self.clone();
        copy.id = Hash256::ZERO;
        let bytes = codec::to_bytes(&copy)?;
        Ok(sha256(&bytes))
    }

    /// Recompute and store the id. Call after any mutation, including signing.
    pub fn finalize(&mut self) -> Result<(), PyriteError> {
        self.id = self.compute_id()?;
        Ok(())
    }

    /// Copy with id zeroed and every input stripped to its outpoint.
    ///
    /// This is the base form of the per-input signing pre-image: signatures
    /// and public keys never feed into what they authenticate.
    pub fn trimmed_copy(&self) -> Self {
        Self {
            id: Hash256::ZERO,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    previous_output: input.previous_output.clone(),
                    signature: Vec::new(),
                    public_key: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tx {}", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            if input.previous_output.is_null() {
                writeln!(f, "  in  {i}: coinbase")?;
            } else {
                writeln!(f, "  in  {i}: {}", input.previous_output)?;
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "  out {i}: {} -> {}", output.value, output.pubkey_hash)?;
        }
        Ok(())
    }
}

/// A proof-of-work sealed batch of transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Seconds since the Unix epoch. Informational, but part of the PoW
    /// pre-image.
    pub timestamp: u64,
    /// Hash of the predecessor; [`Hash256::ZERO`] only for genesis.
    pub prev_hash: Hash256,
    /// Non-empty; `transactions[0]` must be a coinbase.
    pub transactions: Vec<Transaction>,
    /// Nonce found by the proof-of-work search.
    pub nonce: u64,
    /// SHA-256 of the PoW pre-image at `nonce`.
    pub hash: Hash256,
    /// Predecessor height + 1; 0 for genesis.
    pub height: u64,
}

impl Block {
    /// Assemble and seal a block on top of `prev_hash`.
    pub fn mine(
        prev_hash: Hash256,
        transactions: Vec<Transaction>,
        height: u64,
    ) -> Result<Self, PyriteError> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut block = Self {
            timestamp,
            prev_hash,
            transactions,
            nonce: 0,
            hash: Hash256::ZERO,
            height,
        };
        let (nonce, hash) = crate::pow::run(&block)?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Mine the genesis block around the given coinbase.
    pub fn genesis(coinbase: Transaction) -> Result<Self, PyriteError> {
        Self::mine(Hash256::ZERO, vec![coinbase], 0)
    }

    /// Merkle root over the canonical encodings of this block's transactions.
    pub fn hash_transactions(&self) -> Result<Hash256, PyriteError> {
        let mut leaves = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            leaves.push(codec::to_bytes(tx)?);
        }
        Ok(crate::merkle::merkle_root(&leaves))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "block {} (height {})", self.hash, self.height)?;
        writeln!(f, "  prev:  {}", self.prev_hash)?;
        writeln!(f, "  time:  {}", self.timestamp)?;
        writeln!(f, "  nonce: {}", self.nonce)?;
        for tx in &self.transactions {
            write!(f, "{tx}")?;
        }
        Ok(())
    }
}
