//! Derived index of unspent transaction outputs.
//!
//! Lives in the chain store's `utxos` column family: one entry per
//! transaction that still has unspent outputs, keyed by txid and holding
//! the surviving outputs with their original indices. The index is a pure
//! projection of the chain — [`reindex`](UtxoSet::reindex) rebuilds it
//! from scratch, and [`update`](UtxoSet::update) folds one block into it
//! with identical results.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rocksdb::{IteratorMode, WriteBatch};
use serde::{Deserialize, Serialize};
use tracing::info;

use pyrite_core::address::Address;
use pyrite_core::codec;
use pyrite_core::crypto::KeyPair;
use pyrite_core::error::{PyriteError, StoreError, TxError};
use pyrite_core::types::{Block, Hash160, Hash256, OutPoint, Transaction, TxInput, TxOutput};

use crate::store::{Blockchain, CF_UTXOS};

/// A surviving output together with its index in the parent transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

/// The UTXO index over a shared chain store.
#[derive(Clone)]
pub struct UtxoSet {
    chain: Arc<Blockchain>,
}

impl UtxoSet {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        Self { chain }
    }

    /// The chain this index projects.
    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    fn get_entry(&self, txid: &Hash256) -> Result<Option<Vec<UnspentOutput>>, PyriteError> {
        match self.chain.get_raw(CF_UTXOS, txid.as_bytes())? {
            Some(bytes) => Ok(Some(codec::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop the whole index and rebuild it from one walk of the chain.
    ///
    /// Delete and rebuild land in a single write batch, so a reader never
    /// observes a half-built index.
    pub fn reindex(&self) -> Result<(), PyriteError> {
        let cf = self.chain.cf(CF_UTXOS)?;
        let mut batch = WriteBatch::default();

        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            batch.delete_cf(cf, key);
        }

        let unspent = self.unspent_by_tx()?;
        for (txid, outputs) in &unspent {
            batch.put_cf(cf, txid.as_bytes(), codec::to_bytes(outputs)?);
        }

        self.chain.write(batch)?;
        info!(entries = unspent.len(), "rebuilt UTXO index");
        Ok(())
    }

    /// Walk the chain from tip to genesis collecting unspent outputs per tx.
    ///
    /// Spends are observed downstream (closer to the tip) before the
    /// transactions that created the outputs, so a single pass suffices.
    fn unspent_by_tx(&self) -> Result<HashMap<Hash256, Vec<UnspentOutput>>, PyriteError> {
        let mut spent: HashMap<Hash256, HashSet<u32>> = HashMap::new();
        let mut unspent: HashMap<Hash256, Vec<UnspentOutput>> = HashMap::new();

        for block in self.chain.iter()? {
            let block = block?;
            for tx in &block.transactions {
                let spent_here = spent.get(&tx.id);
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as u32;
                    if spent_here.is_some_and(|s| s.contains(&index)) {
                        continue;
                    }
                    unspent.entry(tx.id).or_default().push(UnspentOutput {
                        index,
                        output: output.clone(),
                    });
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(input.previous_output.txid)
                            .or_default()
                            .insert(input.previous_output.index);
                    }
                }
            }
        }

        Ok(unspent)
    }

    /// Fold one block into the index, atomically.
    ///
    /// Every output consumed by the block is struck from its parent entry
    /// (the entry is deleted when emptied) and every new output is recorded
    /// under its transaction's id.
    pub fn update(&self, block: &Block) -> Result<(), PyriteError> {
        let cf = self.chain.cf(CF_UTXOS)?;
        let mut batch = WriteBatch::default();

        // Entries touched by this block are edited in memory first; a
        // parent spent twice by the same block must not resurrect outputs.
        let mut touched: HashMap<Hash256, Vec<UnspentOutput>> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let parent = input.previous_output.txid;
                    if !touched.contains_key(&parent) {
                        let entry = self.get_entry(&parent)?.ok_or_else(|| {
                            StoreError::Corrupt(format!("no UTXO entry for {parent}"))
                        })?;
                        touched.insert(parent, entry);
                    }
                    let outputs = touched.get_mut(&parent).ok_or_else(|| {
                        StoreError::Corrupt(format!("no UTXO entry for {parent}"))
                    })?;
                    outputs.retain(|u| u.index != input.previous_output.index);
                }
            }

            let fresh: Vec<UnspentOutput> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| UnspentOutput {
                    index: index as u32,
                    output: output.clone(),
                })
                .collect();
            touched.insert(tx.id, fresh);
        }

        for (txid, outputs) in &touched {
            if outputs.is_empty() {
                batch.delete_cf(cf, txid.as_bytes());
            } else {
                batch.put_cf(cf, txid.as_bytes(), codec::to_bytes(outputs)?);
            }
        }

        self.chain.write(batch)
    }

    /// Greedily gather outputs locked to `pubkey_hash` until `amount` is
    /// covered, returning the accumulated value and the chosen outpoints
    /// grouped by transaction.
    pub fn find_spendable(
        &self,
        pubkey_hash: &Hash160,
        amount: u64,
    ) -> Result<(u64, HashMap<Hash256, Vec<u32>>), PyriteError> {
        let cf = self.chain.cf(CF_UTXOS)?;
        let mut accumulated = 0u64;
        let mut chosen: HashMap<Hash256, Vec<u32>> = HashMap::new();

        'scan: for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let txid = decode_txid(&key)?;
            let outputs: Vec<UnspentOutput> = codec::from_bytes(&value)?;

            for unspent in outputs {
                if !unspent.output.is_locked_with_key(pubkey_hash) {
                    continue;
                }
                accumulated += unspent.output.value;
                chosen.entry(txid).or_default().push(unspent.index);
                if accumulated >= amount {
                    break 'scan;
                }
            }
        }

        Ok((accumulated, chosen))
    }

    /// All unspent outputs locked to `pubkey_hash`.
    pub fn find_unspent(&self, pubkey_hash: &Hash160) -> Result<Vec<TxOutput>, PyriteError> {
        let cf = self.chain.cf(CF_UTXOS)?;
        let mut found = Vec::new();

        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let outputs: Vec<UnspentOutput> = codec::from_bytes(&value)?;
            for unspent in outputs {
                if unspent.output.is_locked_with_key(pubkey_hash) {
                    found.push(unspent.output);
                }
            }
        }

        Ok(found)
    }

    /// Sum of unspent output values locked to `pubkey_hash`.
    pub fn balance(&self, pubkey_hash: &Hash160) -> Result<u64, PyriteError> {
        Ok(self
            .find_unspent(pubkey_hash)?
            .iter()
            .map(|o| o.value)
            .sum())
    }

    /// Whether the referenced output is still unspent.
    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> Result<bool, PyriteError> {
        Ok(self
            .get_entry(&outpoint.txid)?
            .is_some_and(|outputs| outputs.iter().any(|u| u.index == outpoint.index)))
    }

    /// Every index entry, sorted by txid.
    pub fn entries(&self) -> Result<Vec<(Hash256, Vec<UnspentOutput>)>, PyriteError> {
        let cf = self.chain.cf(CF_UTXOS)?;
        let mut entries = Vec::new();
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            entries.push((decode_txid(&key)?, codec::from_bytes(&value)?));
        }
        entries.sort_by_key(|(txid, _)| *txid);
        Ok(entries)
    }

    /// Number of unspent outputs in the index.
    pub fn count(&self) -> Result<usize, PyriteError> {
        let cf = self.chain.cf(CF_UTXOS)?;
        let mut count = 0;
        for item in self.chain.db().iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let outputs: Vec<UnspentOutput> = codec::from_bytes(&value)?;
            count += outputs.len();
        }
        Ok(count)
    }

    /// Build and sign a transfer of `amount` from the key pair's address to
    /// `to`, spending outputs selected from this index and returning change
    /// to the sender.
    pub fn create_transfer(
        &self,
        from: &KeyPair,
        to: &Address,
        amount: u64,
    ) -> Result<Transaction, PyriteError> {
        let public_key = from.public_key();
        let sender_hash = public_key.pubkey_hash();

        let (accumulated, chosen) = self.find_spendable(&sender_hash, amount)?;
        if accumulated < amount {
            return Err(TxError::InsufficientFunds {
                have: accumulated,
                need: amount,
            }
            .into());
        }

        let mut inputs = Vec::new();
        for (txid, indices) in chosen {
            for index in indices {
                inputs.push(TxInput {
                    previous_output: OutPoint { txid, index },
                    signature: Vec::new(),
                    public_key: public_key.to_bytes().to_vec(),
                });
            }
        }

        let mut outputs = vec![TxOutput {
            value: amount,
            pubkey_hash: to.pubkey_hash(),
        }];
        if accumulated > amount {
            outputs.push(TxOutput {
                value: accumulated - amount,
                pubkey_hash: sender_hash,
            });
        }

        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs,
            outputs,
        };
        self.chain.sign_tx(&mut tx, from)?;
        Ok(tx)
    }
}

fn decode_txid(key: &[u8]) -> Result<Hash256, PyriteError> {
    let bytes: [u8; 32] = key
        .try_into()
        .map_err(|_| StoreError::Corrupt("UTXO key is not a txid".into()))?;
    Ok(Hash256(bytes))
}
