//! # pyrite-network
//! Wire protocol and the node's gossip/sync server.

pub mod protocol;
pub mod server;

pub use protocol::{InvKind, Message};
pub use server::{submit_transaction, Node, NodeConfig};
