//! RocksDB-backed blockchain store.
//!
//! Blocks live in a `blocks` column family keyed by block hash; the `meta`
//! family holds the `lh` key pointing at the current tip. All mutations go
//! through an atomic [`WriteBatch`], so tip advancement commits together
//! with the block that caused it. Reads never lock; the chain is walked
//! cursor-style through `prev_hash` back-pointers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use tracing::info;

use pyrite_core::address::Address;
use pyrite_core::codec;
use pyrite_core::crypto::{self, KeyPair};
use pyrite_core::error::{BlockError, PyriteError, StoreError, TxError};
use pyrite_core::pow;
use pyrite_core::types::{Block, Hash256, Transaction};

pub(crate) const CF_BLOCKS: &str = "blocks";
pub(crate) const CF_UTXOS: &str = "utxos";
pub(crate) const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_UTXOS, CF_META];

/// Metadata key holding the hash of the current tip.
const META_TIP_HASH: &[u8] = b"lh";

/// The persistent chain store.
///
/// Shared across tasks behind an `Arc`; RocksDB serializes writes
/// internally and batches keep tip updates atomic.
pub struct Blockchain {
    db: DB,
    path: PathBuf,
}

/// Whether a store has been created at `path`.
fn store_exists(path: &Path) -> bool {
    path.join("CURRENT").exists()
}

impl Blockchain {
    /// Create a fresh store and mine the genesis block, rewarding `address`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if a store is already
    /// present at `path`.
    pub fn init(path: impl AsRef<Path>, address: &Address) -> Result<Self, PyriteError> {
        let path = path.as_ref();
        if store_exists(path) {
            return Err(StoreError::AlreadyExists(path.display().to_string()).into());
        }

        let chain = Self {
            db: Self::open_db(path)?,
            path: path.to_path_buf(),
        };

        let coinbase = Transaction::genesis_coinbase(address)?;
        let genesis = Block::genesis(coinbase)?;

        let mut batch = WriteBatch::default();
        chain.batch_put_block(&mut batch, &genesis)?;
        chain.batch_set_tip(&mut batch, &genesis.hash)?;
        chain.write(batch)?;

        info!(hash = %genesis.hash, "created blockchain store");
        Ok(chain)
    }

    /// Open an existing store.
    ///
    /// Fails with [`StoreError::Missing`] if nothing has been created at
    /// `path` yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PyriteError> {
        let path = path.as_ref();
        if !store_exists(path) {
            return Err(StoreError::Missing(path.display().to_string()).into());
        }

        let chain = Self {
            db: Self::open_db(path)?,
            path: path.to_path_buf(),
        };
        // A store without a tip pointer is unusable.
        chain.tip_hash()?;
        Ok(chain)
    }

    fn open_db(path: &Path) -> Result<DB, PyriteError> {
        std::fs::create_dir_all(path).map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        DB::open_cf_descriptors(&db_opts, path, cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()).into())
    }

    /// Where this store lives on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush in-memory buffers to disk. Called on shutdown.
    pub fn flush(&self) -> Result<(), PyriteError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()).into())
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, PyriteError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Corrupt(format!("missing column family: {name}")).into())
    }

    pub(crate) fn get_raw(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, PyriteError> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()).into())
    }

    pub(crate) fn write(&self, batch: WriteBatch) -> Result<(), PyriteError> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()).into())
    }

    pub(crate) fn db(&self) -> &DB {
        &self.db
    }

    fn batch_put_block(&self, batch: &mut WriteBatch, block: &Block) -> Result<(), PyriteError> {
        let cf = self.cf(CF_BLOCKS)?;
        batch.put_cf(cf, block.hash.as_bytes(), codec::to_bytes(block)?);
        Ok(())
    }

    fn batch_set_tip(&self, batch: &mut WriteBatch, hash: &Hash256) -> Result<(), PyriteError> {
        let cf = self.cf(CF_META)?;
        batch.put_cf(cf, META_TIP_HASH, hash.as_bytes());
        Ok(())
    }

    /// Hash of the current tip.
    pub fn tip_hash(&self) -> Result<Hash256, PyriteError> {
        match self.get_raw(CF_META, META_TIP_HASH)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Hash256(hash))
            }
            Some(_) => Err(StoreError::Corrupt("tip hash has wrong length".into()).into()),
            None => Err(StoreError::Corrupt("tip pointer missing".into()).into()),
        }
    }

    /// The block at the current tip.
    pub fn tip_block(&self) -> Result<Block, PyriteError> {
        let hash = self.tip_hash()?;
        self.get_block(&hash)
    }

    /// Height of the current tip.
    pub fn tip_height(&self) -> Result<u64, PyriteError> {
        Ok(self.tip_block()?.height)
    }

    /// Fetch a block by hash, failing with [`StoreError::NotFound`].
    pub fn get_block(&self, hash: &Hash256) -> Result<Block, PyriteError> {
        match self.get_raw(CF_BLOCKS, hash.as_bytes())? {
            Some(bytes) => Ok(codec::from_bytes(&bytes)?),
            None => Err(StoreError::NotFound(format!("block {hash}")).into()),
        }
    }

    /// Whether a block with this hash is stored.
    pub fn has_block(&self, hash: &Hash256) -> Result<bool, PyriteError> {
        Ok(self.get_raw(CF_BLOCKS, hash.as_bytes())?.is_some())
    }

    /// Store a block received from a peer.
    ///
    /// Idempotent on the block hash. Structural checks and proof-of-work
    /// must hold. The tip advances only when the new block is strictly
    /// taller than the current tip, so the first block observed at a given
    /// height wins.
    pub fn add_block(&self, block: &Block) -> Result<(), PyriteError> {
        if self.has_block(&block.hash)? {
            return Ok(());
        }

        if block.transactions.is_empty() {
            return Err(BlockError::Empty.into());
        }
        if !block.transactions[0].is_coinbase() {
            return Err(BlockError::FirstTxNotCoinbase.into());
        }
        if !pow::validate(block)? {
            return Err(BlockError::InvalidPoW.into());
        }

        let tip_height = self.tip_height()?;
        let mut batch = WriteBatch::default();
        self.batch_put_block(&mut batch, block)?;
        if block.height > tip_height {
            self.batch_set_tip(&mut batch, &block.hash)?;
        }
        self.write(batch)?;

        info!(hash = %block.hash, height = block.height, "stored block");
        Ok(())
    }

    /// Verify `txs`, build a block on the current tip, mine it, and commit
    /// block plus tip pointer in one batch.
    ///
    /// Every non-coinbase transaction must verify against the chain, and no
    /// two transactions may spend the same outpoint.
    pub fn mine_block(&self, txs: Vec<Transaction>) -> Result<Block, PyriteError> {
        if txs.is_empty() {
            return Err(BlockError::Empty.into());
        }

        let mut spent: HashSet<_> = HashSet::new();
        for tx in &txs {
            if tx.is_coinbase() {
                continue;
            }
            if !self.verify_tx(tx)? {
                return Err(TxError::InvalidTransaction(tx.id.to_string()).into());
            }
            for input in &tx.inputs {
                if !spent.insert(input.previous_output.clone()) {
                    return Err(BlockError::DoubleSpend(input.previous_output.to_string()).into());
                }
            }
        }

        let tip = self.tip_block()?;
        let block = Block::mine(tip.hash, txs, tip.height + 1)?;

        let mut batch = WriteBatch::default();
        self.batch_put_block(&mut batch, &block)?;
        self.batch_set_tip(&mut batch, &block.hash)?;
        self.write(batch)?;

        info!(hash = %block.hash, height = block.height, txs = block.transactions.len(), "mined block");
        Ok(block)
    }

    /// All block hashes on the main chain, genesis first.
    pub fn block_hashes(&self) -> Result<Vec<Hash256>, PyriteError> {
        let mut hashes = Vec::new();
        for block in self.iter()? {
            hashes.push(block?.hash);
        }
        hashes.reverse();
        Ok(hashes)
    }

    /// Cursor over the main chain from tip back to genesis.
    pub fn iter(&self) -> Result<ChainIter<'_>, PyriteError> {
        Ok(ChainIter {
            chain: self,
            current: Some(self.tip_hash()?),
        })
    }

    /// Linear scan for a transaction by id across the whole chain.
    pub fn find_tx(&self, id: &Hash256) -> Result<Transaction, PyriteError> {
        for block in self.iter()? {
            let block = block?;
            for tx in block.transactions {
                if tx.id == *id {
                    return Ok(tx);
                }
            }
        }
        Err(StoreError::NotFound(format!("tx {id}")).into())
    }

    /// Collect the previous transactions referenced by `tx`'s inputs.
    ///
    /// A referenced transaction that is not on the chain is a protocol
    /// violation, surfaced as [`TxError::MissingPrevTx`].
    fn prev_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<Hash256, Transaction>, PyriteError> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            if input.previous_output.is_null() {
                continue;
            }
            let txid = input.previous_output.txid;
            if prev_txs.contains_key(&txid) {
                continue;
            }
            let prev = self
                .find_tx(&txid)
                .map_err(|_| TxError::MissingPrevTx(txid.to_string()))?;
            prev_txs.insert(txid, prev);
        }
        Ok(prev_txs)
    }

    /// Sign every input of `tx` with `keypair` against the chain.
    pub fn sign_tx(&self, tx: &mut Transaction, keypair: &KeyPair) -> Result<(), PyriteError> {
        let prev_txs = self.prev_transactions(tx)?;
        crypto::sign_transaction(tx, keypair, &prev_txs)
    }

    /// Verify `tx`'s signatures against the chain.
    pub fn verify_tx(&self, tx: &Transaction) -> Result<bool, PyriteError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(tx)?;
        crypto::verify_transaction(tx, &prev_txs)
    }
}

/// Iterator walking `prev_hash` links from the tip down to genesis.
pub struct ChainIter<'a> {
    chain: &'a Blockchain,
    current: Option<Hash256>,
}

impl Iterator for ChainIter<'_> {
    type Item = Result<Block, PyriteError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        match self.chain.get_block(&hash) {
            Ok(block) => {
                if !block.prev_hash.is_zero() {
                    self.current = Some(block.prev_hash);
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_core::types::Hash160;

    fn test_address(seed: u8) -> Address {
        Address::from_pubkey_hash(Hash160([seed; 20]))
    }

    fn temp_chain() -> (Blockchain, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let chain = Blockchain::init(dir.path().join("blocks"), &test_address(0xAA)).unwrap();
        (chain, dir)
    }

    #[test]
    fn init_creates_genesis() {
        let (chain, _dir) = temp_chain();
        assert_eq!(chain.tip_height().unwrap(), 0);

        let genesis = chain.tip_block().unwrap();
        assert!(genesis.prev_hash.is_zero());
        assert!(genesis.transactions[0].is_coinbase());
        assert!(pow::validate(&genesis).unwrap());
    }

    #[test]
    fn init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks");
        let chain = Blockchain::init(&path, &test_address(1)).unwrap();
        drop(chain);
        assert!(matches!(
            Blockchain::init(&path, &test_address(1)),
            Err(PyriteError::Store(StoreError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn open_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Blockchain::open(dir.path().join("nothing")),
            Err(PyriteError::Store(StoreError::Missing(_)))
        ));
    }

    #[test]
    fn get_block_not_found() {
        let (chain, _dir) = temp_chain();
        assert!(matches!(
            chain.get_block(&Hash256([0x99; 32])),
            Err(PyriteError::Store(StoreError::NotFound(_)))
        ));
    }

    #[test]
    fn mine_block_advances_tip() {
        let (chain, _dir) = temp_chain();
        let cb = Transaction::new_coinbase(&test_address(0xBB), None).unwrap();
        let block = chain.mine_block(vec![cb]).unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(chain.tip_hash().unwrap(), block.hash);
        assert_eq!(chain.get_block(&block.hash).unwrap(), block);
    }

    #[test]
    fn add_block_is_idempotent_and_monotonic() {
        let (chain, _dir) = temp_chain();
        let cb = Transaction::new_coinbase(&test_address(0xBB), None).unwrap();
        let block = chain.mine_block(vec![cb]).unwrap();
        let tip = chain.tip_hash().unwrap();

        // Same block again: no change.
        chain.add_block(&block).unwrap();
        assert_eq!(chain.tip_hash().unwrap(), tip);

        // A competing block at the same height: stored, tip keeps first-wins.
        let genesis = chain.get_block(&block.prev_hash).unwrap();
        let cb2 = Transaction::new_coinbase(&test_address(0xCC), None).unwrap();
        let rival = Block::mine(genesis.hash, vec![cb2], 1).unwrap();
        chain.add_block(&rival).unwrap();
        assert!(chain.has_block(&rival.hash).unwrap());
        assert_eq!(chain.tip_hash().unwrap(), tip);
    }

    #[test]
    fn add_block_rejects_bad_pow() {
        let (chain, _dir) = temp_chain();
        let cb = Transaction::new_coinbase(&test_address(0xBB), None).unwrap();
        let mut block = chain.mine_block(vec![cb]).unwrap();
        block.nonce += 1;
        block.hash = Hash256([0x42; 32]);
        assert!(matches!(
            chain.add_block(&block),
            Err(PyriteError::Block(BlockError::InvalidPoW))
        ));
    }

    #[test]
    fn iter_walks_tip_to_genesis() {
        let (chain, _dir) = temp_chain();
        for seed in 1..=3u8 {
            let cb = Transaction::new_coinbase(&test_address(seed), None).unwrap();
            chain.mine_block(vec![cb]).unwrap();
        }

        let heights: Vec<u64> = chain
            .iter()
            .unwrap()
            .map(|b| b.unwrap().height)
            .collect();
        assert_eq!(heights, vec![3, 2, 1, 0]);
    }

    #[test]
    fn block_hashes_are_genesis_first() {
        let (chain, _dir) = temp_chain();
        let cb = Transaction::new_coinbase(&test_address(1), None).unwrap();
        let block = chain.mine_block(vec![cb]).unwrap();

        let hashes = chain.block_hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[1], block.hash);
        assert_eq!(chain.get_block(&hashes[0]).unwrap().height, 0);
    }

    #[test]
    fn find_tx_locates_genesis_coinbase() {
        let (chain, _dir) = temp_chain();
        let genesis = chain.tip_block().unwrap();
        let id = genesis.transactions[0].id;
        assert_eq!(chain.find_tx(&id).unwrap().id, id);
        assert!(chain.find_tx(&Hash256([7; 32])).is_err());
    }
}
