//! Wallet error types.
use thiserror::Error;

use pyrite_core::error::CryptoError;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("i/o: {0}")] Io(#[from] std::io::Error),
    #[error("bad wallet file: {0}")] Format(String),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error("no key for address {0}")] UnknownAddress(String),
}
