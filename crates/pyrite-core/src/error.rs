//! Error types for the Pyrite protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid version byte: {0}")] InvalidVersion(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key generation failed")] KeyGeneration,
    #[error("key material rejected: {0}")] KeyRejected(String),
    #[error("signing failed")] SigningFailed,
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("missing previous transaction: {0}")] MissingPrevTx(String),
    #[error("invalid transaction: {0}")] InvalidTransaction(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("nonce space exhausted without a solution")] NoSolutionFound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("proof of work does not validate")] InvalidPoW,
    #[error("block has no transactions")] Empty,
    #[error("first transaction is not a coinbase")] FirstTxNotCoinbase,
    #[error("double spend inside block: {0}")] DoubleSpend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("conflicts with pool tx {existing_txid} on outpoint {outpoint}")] Conflict { existing_txid: String, outpoint: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("blockchain store already exists at {0}")] AlreadyExists(String),
    #[error("no blockchain store at {0}")] Missing(String),
    #[error("not found: {0}")] NotFound(String),
    #[error("store corrupt: {0}")] Corrupt(String),
    #[error("storage backend: {0}")] Backend(String),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("unknown command: {0}")] UnknownCommand(String),
    #[error("message too large: {size} > {max}")] MessageTooLarge { size: usize, max: usize },
    #[error("peer unreachable: {0}")] PeerUnreachable(String),
    #[error("timed out")] Timeout,
    #[error("i/o: {0}")] Io(#[from] std::io::Error),
    #[error("internal: {0}")] Internal(String),
}

/// Top-level error wrapping every domain error in the workspace.
#[derive(Error, Debug)]
pub enum PyriteError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Tx(#[from] TxError),
    #[error(transparent)] Pow(#[from] PowError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Network(#[from] NetworkError),
}
