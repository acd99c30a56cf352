//! End-to-end tests over the chain store and UTXO index.
//!
//! Each test boots a fresh store in a temp directory, drives it through
//! the wallet-level flows (genesis, transfers, mining), and checks the
//! ledger invariants: balances, UTXO consistency, tip behavior, and
//! recovery across a restart.

use std::sync::Arc;

use pyrite_core::address::Address;
use pyrite_core::constants::COINBASE_REWARD;
use pyrite_core::crypto::KeyPair;
use pyrite_core::error::{BlockError, PyriteError, TxError};
use pyrite_core::types::Transaction;
use pyrite_node::{Blockchain, UtxoSet};

struct TestNode {
    utxo: UtxoSet,
    _dir: tempfile::TempDir,
}

impl TestNode {
    /// Initialize a chain whose genesis rewards `owner`, with a fresh index.
    fn new(owner: &KeyPair) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::from_public_key(&owner.public_key());
        let chain = Arc::new(Blockchain::init(dir.path().join("blocks"), &address).unwrap());
        let utxo = UtxoSet::new(chain);
        utxo.reindex().unwrap();
        Self { utxo, _dir: dir }
    }

    fn chain(&self) -> &Blockchain {
        self.utxo.chain()
    }

    /// Mine a block holding `txs` plus a coinbase to `miner`, then fold it
    /// into the UTXO index.
    fn mine(&self, miner: &KeyPair, mut txs: Vec<Transaction>) {
        let address = Address::from_public_key(&miner.public_key());
        let coinbase = Transaction::new_coinbase(&address, None).unwrap();
        txs.insert(0, coinbase);
        let block = self.chain().mine_block(txs).unwrap();
        self.utxo.update(&block).unwrap();
    }

    fn balance(&self, who: &KeyPair) -> u64 {
        self.utxo
            .balance(&who.public_key().pubkey_hash())
            .unwrap()
    }
}

// --- S1: single-node genesis ---

#[test]
fn genesis_funds_the_owner() {
    let alice = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    assert_eq!(node.balance(&alice), COINBASE_REWARD);
    assert_eq!(node.utxo.count().unwrap(), 1);
    assert_eq!(node.chain().tip_height().unwrap(), 0);
}

// --- S2: transfer with change ---

#[test]
fn transfer_with_change() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    let tx = node.utxo.create_transfer(&alice, &to_bob, 30).unwrap();
    assert!(node.chain().verify_tx(&tx).unwrap());
    node.mine(&alice, vec![tx]);

    // Alice: fresh coinbase (100) + change (70). Bob: 30.
    assert_eq!(node.balance(&alice), 170);
    assert_eq!(node.balance(&bob), 30);
    assert_eq!(node.chain().tip_height().unwrap(), 1);
    assert_eq!(node.utxo.count().unwrap(), 3);
}

#[test]
fn transfer_exact_amount_has_no_change() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    let tx = node
        .utxo
        .create_transfer(&alice, &to_bob, COINBASE_REWARD)
        .unwrap();
    assert_eq!(tx.outputs.len(), 1);
    node.mine(&alice, vec![tx]);

    assert_eq!(node.balance(&bob), COINBASE_REWARD);
    assert_eq!(node.balance(&alice), COINBASE_REWARD);
}

#[test]
fn insufficient_funds_is_reported() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    let err = node
        .utxo
        .create_transfer(&alice, &to_bob, COINBASE_REWARD + 1)
        .unwrap_err();
    assert!(matches!(
        err,
        PyriteError::Tx(TxError::InsufficientFunds { have: 100, need: 101 })
    ));
}

// --- S3: double-spend rejection ---

#[test]
fn double_spend_rejected_at_mine_time() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let carol = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    let to_carol = Address::from_public_key(&carol.public_key());

    // Both transfers select the same genesis output.
    let tx1 = node.utxo.create_transfer(&alice, &to_bob, 30).unwrap();
    let tx2 = node.utxo.create_transfer(&alice, &to_carol, 40).unwrap();

    let address = Address::from_public_key(&alice.public_key());
    let coinbase = Transaction::new_coinbase(&address, None).unwrap();
    let err = node
        .chain()
        .mine_block(vec![coinbase, tx1.clone(), tx2])
        .unwrap_err();
    assert!(matches!(err, PyriteError::Block(BlockError::DoubleSpend(_))));

    // One of them alone is fine.
    node.mine(&alice, vec![tx1]);
    assert_eq!(node.balance(&bob), 30);
}

// --- S5: tampered signature ---

#[test]
fn tampered_signature_is_dropped() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    let mut tx = node.utxo.create_transfer(&alice, &to_bob, 30).unwrap();
    tx.inputs[0].signature[7] ^= 0x01;

    assert!(!node.chain().verify_tx(&tx).unwrap());

    let address = Address::from_public_key(&alice.public_key());
    let coinbase = Transaction::new_coinbase(&address, None).unwrap();
    let err = node.chain().mine_block(vec![coinbase, tx]).unwrap_err();
    assert!(matches!(err, PyriteError::Tx(TxError::InvalidTransaction(_))));
}

// --- Property 7: reindex equals folded updates ---

#[test]
fn incremental_update_matches_reindex() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    let to_alice = Address::from_public_key(&alice.public_key());

    let tx = node.utxo.create_transfer(&alice, &to_bob, 25).unwrap();
    node.mine(&alice, vec![tx]);
    let tx = node.utxo.create_transfer(&bob, &to_alice, 10).unwrap();
    node.mine(&bob, vec![tx]);

    let incremental = node.utxo.entries().unwrap();
    node.utxo.reindex().unwrap();
    let rebuilt = node.utxo.entries().unwrap();

    assert_eq!(incremental, rebuilt);
}

// --- Property 8: balance conservation ---

#[test]
fn total_value_equals_reward_times_blocks() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();
    let node = TestNode::new(&alice);

    let to_bob = Address::from_public_key(&bob.public_key());
    for amount in [10, 20, 5] {
        let tx = node.utxo.create_transfer(&alice, &to_bob, amount).unwrap();
        node.mine(&alice, vec![tx]);
    }

    let blocks = node.chain().tip_height().unwrap() + 1;
    let total: u64 = node
        .utxo
        .entries()
        .unwrap()
        .iter()
        .flat_map(|(_, outputs)| outputs.iter().map(|u| u.output.value))
        .sum();
    assert_eq!(total, COINBASE_REWARD * blocks);
}

// --- S6: restart recovery ---

#[test]
fn restart_preserves_tip_and_index() {
    let alice = KeyPair::generate().unwrap();
    let bob = KeyPair::generate().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks");

    let (tip_before, count_before) = {
        let address = Address::from_public_key(&alice.public_key());
        let chain = Arc::new(Blockchain::init(&path, &address).unwrap());
        let utxo = UtxoSet::new(chain);
        utxo.reindex().unwrap();

        let to_bob = Address::from_public_key(&bob.public_key());
        let tx = utxo.create_transfer(&alice, &to_bob, 30).unwrap();
        let coinbase = Transaction::new_coinbase(&address, None).unwrap();
        let block = utxo.chain().mine_block(vec![coinbase, tx]).unwrap();
        utxo.update(&block).unwrap();

        utxo.chain().flush().unwrap();
        (utxo.chain().tip_hash().unwrap(), utxo.count().unwrap())
    };

    let chain = Arc::new(Blockchain::open(&path).unwrap());
    let utxo = UtxoSet::new(chain);
    assert_eq!(utxo.chain().tip_hash().unwrap(), tip_before);
    assert_eq!(utxo.count().unwrap(), count_before);
}
