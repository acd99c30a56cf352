//! ECDSA P-256 operations and protocol hash functions.
//!
//! Key generation, transaction signing, and signature verification via
//! `ring`, plus the SHA-256 / RIPEMD-160 helpers the rest of the protocol
//! hashes with.
//!
//! # Signing scheme
//!
//! Each input is signed over a *trimmed copy* of its transaction: the id is
//! zeroed, every input's signature and public key are cleared, and only the
//! input being signed carries the referenced output's pubkey hash in its
//! `public_key` slot. The SHA-256 of that copy's canonical encoding is the
//! message handed to ECDSA. Verification reconstructs the same pre-image
//! from the chain's previous transactions, so a signature commits to what
//! is being spent and where it is going.

use std::collections::HashMap;
use std::fmt;

use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair as _, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::{CryptoError, PyriteError, TxError};
use crate::types::{Hash160, Hash256, Transaction};

/// Raw public key length: X‖Y coordinates, 32 bytes each.
pub const PUBLIC_KEY_LEN: usize = 64;

/// Fixed signature length: r‖s, 32 bytes each.
pub const SIGNATURE_LEN: usize = 64;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// SHA-256 applied twice; used for address checksums.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(Sha256::digest(data)).into())
}

/// RIPEMD-160(SHA-256(data)): the output-lock form of a public key.
pub fn hash_pubkey(data: &[u8]) -> Hash160 {
    Hash160(Ripemd160::digest(Sha256::digest(data)).into())
}

/// ECDSA P-256 key pair.
///
/// Holds the PKCS#8 document it was parsed from so the key can be
/// persisted and reloaded byte-identically.
pub struct KeyPair {
    pkcs8: Vec<u8>,
    inner: EcdsaKeyPair,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS cryptographic RNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| CryptoError::KeyGeneration)?;
        Self::from_pkcs8(document.as_ref())
    }

    /// Reconstruct a key pair from a PKCS#8 document.
    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let inner = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, bytes, &rng)
            .map_err(|e| CryptoError::KeyRejected(e.to_string()))?;
        Ok(Self {
            pkcs8: bytes.to_vec(),
            inner,
        })
    }

    /// The PKCS#8 document this key pair persists as.
    pub fn to_pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Derive the public key as raw X‖Y coordinates.
    pub fn public_key(&self) -> PublicKey {
        // ring exposes the uncompressed SEC1 form: 0x04 ‖ X ‖ Y.
        let sec1 = self.inner.public_key().as_ref();
        let mut xy = [0u8; PUBLIC_KEY_LEN];
        xy.copy_from_slice(&sec1[1..1 + PUBLIC_KEY_LEN]);
        PublicKey { xy }
    }

    /// Sign a message, returning the fixed-form r‖s signature.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
        let rng = SystemRandom::new();
        let signature = self
            .inner
            .sign(&rng, message)
            .map_err(|_| CryptoError::SigningFailed)?;
        signature
            .as_ref()
            .try_into()
            .map_err(|_| CryptoError::SigningFailed)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// P-256 public key as raw X‖Y coordinates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    xy: [u8; PUBLIC_KEY_LEN],
}

impl PublicKey {
    /// Parse a raw X‖Y public key. Point validity is checked at verify time.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let xy: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { xy })
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.xy
    }

    /// The pubkey hash this key unlocks outputs for.
    pub fn pubkey_hash(&self) -> Hash160 {
        hash_pubkey(&self.xy)
    }

    /// Verify an r‖s signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        if signature.len() != SIGNATURE_LEN {
            return Err(CryptoError::InvalidSignature);
        }
        let mut sec1 = [0u8; 1 + PUBLIC_KEY_LEN];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.xy);
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &sec1[..])
            .verify(message, signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.xy))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.xy))
    }
}

/// The message signed for one input: SHA-256 of the trimmed copy with the
/// referenced output's pubkey hash standing in for this input's key.
fn input_sighash(
    tx: &Transaction,
    input_index: usize,
    prev_pubkey_hash: &Hash160,
) -> Result<Hash256, PyriteError> {
    let mut trimmed = tx.trimmed_copy();
    trimmed.inputs[input_index].public_key = prev_pubkey_hash.as_bytes().to_vec();
    let bytes = codec::to_bytes(&trimmed)?;
    Ok(sha256(&bytes))
}

/// Look up the output an input spends, in the caller-provided map of
/// previous transactions.
fn referenced_output<'a>(
    prev_txs: &'a HashMap<Hash256, Transaction>,
    tx: &Transaction,
    input_index: usize,
) -> Result<&'a crate::types::TxOutput, PyriteError> {
    let outpoint = &tx.inputs[input_index].previous_output;
    let prev_tx = prev_txs
        .get(&outpoint.txid)
        .ok_or_else(|| TxError::MissingPrevTx(outpoint.txid.to_string()))?;
    prev_tx
        .outputs
        .get(outpoint.index as usize)
        .ok_or_else(|| TxError::InvalidTransaction(format!("no output at {outpoint}")).into())
}

/// Sign every input of `tx` with `keypair`, then refresh the id.
///
/// `prev_txs` must contain every transaction referenced by an input;
/// a gap is a protocol violation surfaced as [`TxError::MissingPrevTx`].
/// Coinbase transactions are left untouched.
pub fn sign_transaction(
    tx: &mut Transaction,
    keypair: &KeyPair,
    prev_txs: &HashMap<Hash256, Transaction>,
) -> Result<(), PyriteError> {
    if tx.is_coinbase() {
        return Ok(());
    }

    let public_key = keypair.public_key().to_bytes().to_vec();
    for index in 0..tx.inputs.len() {
        let lock = referenced_output(prev_txs, tx, index)?.pubkey_hash;
        let sighash = input_sighash(tx, index, &lock)?;
        let signature = keypair.sign(sighash.as_bytes())?;
        tx.inputs[index].signature = signature.to_vec();
        tx.inputs[index].public_key = public_key.clone();
    }
    tx.finalize()
}

/// Verify every input signature of `tx` against the chain's previous
/// transactions.
///
/// Returns `Ok(false)` when any input fails — wrong key, tampered bytes,
/// or a key that does not hash to the spent output's lock. A missing
/// previous transaction is an error, not a clean rejection.
pub fn verify_transaction(
    tx: &Transaction,
    prev_txs: &HashMap<Hash256, Transaction>,
) -> Result<bool, PyriteError> {
    if tx.is_coinbase() {
        return Ok(true);
    }

    for index in 0..tx.inputs.len() {
        let lock = referenced_output(prev_txs, tx, index)?.pubkey_hash;
        let input = &tx.inputs[index];

        // The key must actually own the output being spent.
        if !input.uses_key(&lock) {
            return Ok(false);
        }

        let public_key = match PublicKey::from_bytes(&input.public_key) {
            Ok(pk) => pk,
            Err(_) => return Ok(false),
        };

        let sighash = input_sighash(tx, index, &lock)?;
        if public_key.verify(sighash.as_bytes(), &input.signature).is_err() {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput, TxOutput};

    /// A signed one-input transfer spending `prev`'s first output.
    fn signed_transfer(
        keypair: &KeyPair,
        prev: &Transaction,
    ) -> (Transaction, HashMap<Hash256, Transaction>) {
        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: prev.id,
                    index: 0,
                },
                signature: Vec::new(),
                public_key: Vec::new(),
            }],
            outputs: vec![TxOutput {
                value: prev.outputs[0].value,
                pubkey_hash: Hash160([0x22; 20]),
            }],
        };

        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id, prev.clone());

        sign_transaction(&mut tx, keypair, &prev_txs).unwrap();
        (tx, prev_txs)
    }

    /// A finalized "previous" transaction paying `keypair`'s address.
    fn funding_tx(keypair: &KeyPair) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: Vec::new(),
                public_key: b"funding".to_vec(),
            }],
            outputs: vec![TxOutput {
                value: 100,
                pubkey_hash: keypair.public_key().pubkey_hash(),
            }],
        };
        tx.finalize().unwrap();
        tx
    }

    // --- Hash helpers ---

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            format!("{}", sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_pubkey_is_20_bytes_and_deterministic() {
        let h = hash_pubkey(b"some key material");
        assert_eq!(h, hash_pubkey(b"some key material"));
        assert_ne!(h, hash_pubkey(b"other key material"));
    }

    #[test]
    fn double_sha256_differs_from_single() {
        assert_ne!(sha256(b"pyrite"), double_sha256(b"pyrite"));
    }

    // --- Keys ---

    #[test]
    fn generated_keys_are_unique() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public_key().to_bytes(), b.public_key().to_bytes());
    }

    #[test]
    fn pkcs8_round_trip() {
        let kp = KeyPair::generate().unwrap();
        let restored = KeyPair::from_pkcs8(kp.to_pkcs8()).unwrap();
        assert_eq!(kp.public_key().to_bytes(), restored.public_key().to_bytes());
    }

    #[test]
    fn from_pkcs8_rejects_garbage() {
        assert!(KeyPair::from_pkcs8(&[0u8; 16]).is_err());
    }

    #[test]
    fn public_key_from_bytes_checks_length() {
        assert!(PublicKey::from_bytes(&[0u8; 63]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 64]).is_ok());
    }

    #[test]
    fn debug_hides_secret_material() {
        let kp = KeyPair::generate().unwrap();
        let debug = format!("{kp:?}");
        assert!(!debug.contains(&hex::encode(kp.to_pkcs8())));
    }

    // --- Raw sign/verify ---

    #[test]
    fn sign_verify_message() {
        let kp = KeyPair::generate().unwrap();
        let sig = kp.sign(b"hello pyrite").unwrap();
        assert!(kp.public_key().verify(b"hello pyrite", &sig).is_ok());
        assert!(kp.public_key().verify(b"hello pyrit3", &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let sig = a.sign(b"msg").unwrap();
        assert_eq!(
            b.public_key().verify(b"msg", &sig).unwrap_err(),
            CryptoError::VerificationFailed
        );
    }

    #[test]
    fn verify_rejects_short_signature() {
        let kp = KeyPair::generate().unwrap();
        assert_eq!(
            kp.public_key().verify(b"msg", &[0u8; 63]).unwrap_err(),
            CryptoError::InvalidSignature
        );
    }

    // --- Transaction sign/verify ---

    #[test]
    fn signed_transfer_verifies() {
        let kp = KeyPair::generate().unwrap();
        let prev = funding_tx(&kp);
        let (tx, prev_txs) = signed_transfer(&kp, &prev);

        assert_eq!(tx.inputs[0].signature.len(), SIGNATURE_LEN);
        assert_eq!(tx.inputs[0].public_key.len(), PUBLIC_KEY_LEN);
        assert!(verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn id_is_refreshed_after_signing() {
        let kp = KeyPair::generate().unwrap();
        let prev = funding_tx(&kp);
        let (tx, _) = signed_transfer(&kp, &prev);
        assert_eq!(tx.id, tx.compute_id().unwrap());
    }

    #[test]
    fn flipped_signature_byte_fails() {
        let kp = KeyPair::generate().unwrap();
        let prev = funding_tx(&kp);
        let (mut tx, prev_txs) = signed_transfer(&kp, &prev);

        for byte in 0..SIGNATURE_LEN {
            tx.inputs[0].signature[byte] ^= 0x01;
            assert!(
                !verify_transaction(&tx, &prev_txs).unwrap(),
                "flip at byte {byte} still verified"
            );
            tx.inputs[0].signature[byte] ^= 0x01;
        }
        assert!(verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn tampered_output_fails() {
        let kp = KeyPair::generate().unwrap();
        let prev = funding_tx(&kp);
        let (mut tx, prev_txs) = signed_transfer(&kp, &prev);

        tx.outputs[0].value = 1;
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn signer_must_own_the_output() {
        let owner = KeyPair::generate().unwrap();
        let thief = KeyPair::generate().unwrap();
        let prev = funding_tx(&owner);
        // The thief signs correctly with their own key, but the spent
        // output is locked to the owner's pubkey hash.
        let (tx, prev_txs) = signed_transfer(&thief, &prev);
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }

    #[test]
    fn missing_prev_tx_is_an_error() {
        let kp = KeyPair::generate().unwrap();
        let prev = funding_tx(&kp);
        let (tx, _) = signed_transfer(&kp, &prev);

        let empty = HashMap::new();
        assert!(matches!(
            verify_transaction(&tx, &empty),
            Err(PyriteError::Tx(TxError::MissingPrevTx(_)))
        ));
    }

    #[test]
    fn coinbase_skips_signing_and_verifies() {
        let to = crate::address::Address::from_pubkey_hash(Hash160([1; 20]));
        let mut cb = Transaction::new_coinbase(&to, None).unwrap();
        let kp = KeyPair::generate().unwrap();
        let empty = HashMap::new();

        sign_transaction(&mut cb, &kp, &empty).unwrap();
        assert!(cb.inputs[0].signature.is_empty());
        assert!(verify_transaction(&cb, &empty).unwrap());
    }

    #[test]
    fn garbage_public_key_fails_cleanly() {
        let kp = KeyPair::generate().unwrap();
        let prev = funding_tx(&kp);
        let (mut tx, prev_txs) = signed_transfer(&kp, &prev);

        // Keep the right lock hash impossible: any pubkey change breaks
        // uses_key first, which is still a clean false.
        tx.inputs[0].public_key = vec![0xFF; 10];
        assert!(!verify_transaction(&tx, &prev_txs).unwrap());
    }
}
