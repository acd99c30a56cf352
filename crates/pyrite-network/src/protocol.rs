//! Wire message types for the Pyrite P2P protocol.
//!
//! Every TCP message is `command ‖ payload`: an ASCII command label
//! zero-padded to [`COMMAND_LENGTH`] bytes, followed by the canonical
//! encoding of a command-specific record. One message per connection; the
//! sender closes its write side when done.

use serde::{Deserialize, Serialize};

use pyrite_core::codec;
use pyrite_core::constants::{COMMAND_LENGTH, MAX_MESSAGE_SIZE};
use pyrite_core::error::{CodecError, NetworkError, PyriteError};
use pyrite_core::types::{Block, Hash256, Transaction};

/// What an `inv` or `getdata` message refers to.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum InvKind {
    Block,
    Tx,
}

/// Handshake announcement: protocol version and chain height.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: u64,
    pub addr_from: String,
}

/// Gossip of known peer addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AddrPayload {
    pub addresses: Vec<String>,
}

/// Offer of items (blocks or transactions) by id.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

/// Request for the peer's chain of block hashes.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

/// Request for a single item by id.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Hash256,
}

/// Delivery of one block.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Block,
}

/// Delivery of one transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxPayload {
    pub addr_from: String,
    pub tx: Transaction,
}

/// A framed message between Pyrite peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Addr(AddrPayload),
    Inv(InvPayload),
    GetBlocks(GetBlocksPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
}

impl Message {
    /// The ASCII command label of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetBlocks(_) => "getblocks",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Frame this message: zero-padded command followed by the payload.
    pub fn encode(&self) -> Result<Vec<u8>, PyriteError> {
        let payload = match self {
            Message::Version(p) => codec::to_bytes(p)?,
            Message::Addr(p) => codec::to_bytes(p)?,
            Message::Inv(p) => codec::to_bytes(p)?,
            Message::GetBlocks(p) => codec::to_bytes(p)?,
            Message::GetData(p) => codec::to_bytes(p)?,
            Message::Block(p) => codec::to_bytes(p)?,
            Message::Tx(p) => codec::to_bytes(p)?,
        };

        let total = COMMAND_LENGTH + payload.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge {
                size: total,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let mut frame = vec![0u8; COMMAND_LENGTH];
        frame[..self.command().len()].copy_from_slice(self.command().as_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Parse a framed message. The size cap is checked before any decoding.
    pub fn decode(data: &[u8]) -> Result<Self, PyriteError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }
        if data.len() < COMMAND_LENGTH {
            return Err(CodecError::Decode("message shorter than command frame".into()).into());
        }

        let command_bytes: Vec<u8> = data[..COMMAND_LENGTH]
            .iter()
            .copied()
            .take_while(|b| *b != 0)
            .collect();
        let command = std::str::from_utf8(&command_bytes)
            .map_err(|_| CodecError::Decode("command is not ASCII".into()))?
            .to_string();

        let payload = &data[COMMAND_LENGTH..];
        match command.as_str() {
            "version" => Ok(Message::Version(codec::from_bytes(payload)?)),
            "addr" => Ok(Message::Addr(codec::from_bytes(payload)?)),
            "inv" => Ok(Message::Inv(codec::from_bytes(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(codec::from_bytes(payload)?)),
            "getdata" => Ok(Message::GetData(codec::from_bytes(payload)?)),
            "block" => Ok(Message::Block(codec::from_bytes(payload)?)),
            "tx" => Ok(Message::Tx(codec::from_bytes(payload)?)),
            _ => Err(NetworkError::UnknownCommand(command).into()),
        }
    }
}
