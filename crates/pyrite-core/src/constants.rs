//! Protocol constants. All monetary values are in whole coins.

/// Wire protocol version announced in `version` messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed width of the command field in every wire message.
pub const COMMAND_LENGTH: usize = 12;

/// The hard-coded bootstrap node every fresh node dials on startup.
pub const BOOTSTRAP_NODE: &str = "localhost:3000";

/// Number of leading zero bits a valid block hash must carry.
pub const DIFFICULTY_BITS: u32 = 12;

/// Coins minted by each coinbase transaction.
pub const COINBASE_REWARD: u64 = 100;

/// Payload carried by the genesis coinbase input.
pub const GENESIS_DATA: &[u8] = b"Fool's gold, honest ledger.";

/// Largest wire message a node will decode (one block plus framing slack).
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_fit_the_frame() {
        for cmd in ["version", "addr", "inv", "getblocks", "getdata", "block", "tx"] {
            assert!(cmd.len() <= COMMAND_LENGTH, "{cmd} exceeds the command field");
        }
    }

    #[test]
    fn difficulty_is_searchable() {
        // Expected attempts (2^12) must stay far below the nonce ceiling.
        assert!(DIFFICULTY_BITS < 40);
    }
}
