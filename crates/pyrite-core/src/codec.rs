//! Canonical binary encoding of domain values.
//!
//! Every hash in the protocol is computed over this encoding, so it must be
//! byte-identical across peers: bincode with the standard configuration, no
//! alternatives. A node that encodes differently forks itself off the
//! network on its first block.

use crate::error::CodecError;

/// Encode a domain value into its canonical byte form.
pub fn to_bytes<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a domain value from its canonical byte form.
///
/// Trailing bytes are rejected: a wire payload must be exactly one value.
pub fn from_bytes<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, CodecError> {
    let (value, consumed): (T, usize) =
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
    if consumed != bytes.len() {
        return Err(CodecError::Decode(format!(
            "{} trailing byte(s)",
            bytes.len() - consumed
        )));
    }
    Ok(value)
}
