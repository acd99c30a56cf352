//! In-memory pool of unconfirmed transactions.
//!
//! Transactions wait here between gossip and block inclusion. The pool
//! checks duplicates and input conflicts; signature validity is the
//! caller's job (via the chain's `verify_tx`). Entries are evicted when a
//! block containing them is mined or received.
//!
//! Not thread-safe — the node wraps it in a mutex.

use std::collections::HashMap;

use crate::error::MempoolError;
use crate::types::{Block, Hash256, OutPoint, Transaction};

/// Pool of unconfirmed transactions keyed by id.
#[derive(Default)]
pub struct Mempool {
    entries: HashMap<Hash256, Transaction>,
    /// Outpoint → id of the pool transaction spending it.
    by_outpoint: HashMap<OutPoint, Hash256>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction, rejecting duplicates and double-spends
    /// against transactions already in the pool.
    pub fn insert(&mut self, tx: Transaction) -> Result<Hash256, MempoolError> {
        let txid = tx.id;
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }

        for input in &tx.inputs {
            if input.previous_output.is_null() {
                continue;
            }
            if let Some(existing) = self.by_outpoint.get(&input.previous_output) {
                return Err(MempoolError::Conflict {
                    existing_txid: existing.to_string(),
                    outpoint: input.previous_output.to_string(),
                });
            }
        }

        for input in &tx.inputs {
            if !input.previous_output.is_null() {
                self.by_outpoint.insert(input.previous_output.clone(), txid);
            }
        }
        self.entries.insert(txid, tx);
        Ok(txid)
    }

    /// Remove a transaction by id, returning it if present.
    pub fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        let tx = self.entries.remove(txid)?;
        for input in &tx.inputs {
            self.by_outpoint.remove(&input.previous_output);
        }
        Some(tx)
    }

    /// Evict every transaction that appears in the given block.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.remove(&tx.id);
        }
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.entries.get(txid)
    }

    /// Snapshot of the pool contents, in no particular order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
