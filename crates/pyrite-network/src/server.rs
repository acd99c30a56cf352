//! The node server: TCP listener, command dispatch, chain sync, mining.
//!
//! One message per connection, Go-style: a peer dials, writes a framed
//! command, and closes its write side; the handler reads to EOF under a
//! deadline and dispatches. All handlers share the chain store, UTXO
//! index, mempool, known-peer list, and the in-flight block queue; the
//! in-process collections sit behind mutexes that are never held across
//! an await point.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use pyrite_core::address::Address;
use pyrite_core::constants::{BOOTSTRAP_NODE, PROTOCOL_VERSION};
use pyrite_core::error::{NetworkError, PyriteError};
use pyrite_core::mempool::Mempool;
use pyrite_core::types::{Block, Hash256, Transaction};
use pyrite_node::{Blockchain, UtxoSet};

use crate::protocol::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    TxPayload, VersionPayload,
};

/// Deadline for reading one inbound message.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Node configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Address this node listens on and announces as its identity.
    pub listen_addr: String,
    /// The bootstrap node dialed on startup.
    pub bootstrap_addr: String,
    /// Mining reward address; `None` disables mining.
    pub miner: Option<Address>,
}

impl NodeConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            bootstrap_addr: BOOTSTRAP_NODE.to_string(),
            miner: None,
        }
    }
}

/// A running peer: shared chain state plus the gossip collections.
pub struct Node {
    config: NodeConfig,
    chain: Arc<Blockchain>,
    utxo: UtxoSet,
    mempool: Mutex<Mempool>,
    known_nodes: Mutex<Vec<String>>,
    blocks_in_transit: Mutex<Vec<Hash256>>,
}

impl Node {
    pub fn new(config: NodeConfig, chain: Arc<Blockchain>) -> Arc<Self> {
        let utxo = UtxoSet::new(chain.clone());
        let known_nodes = vec![config.bootstrap_addr.clone()];
        Arc::new(Self {
            config,
            chain,
            utxo,
            mempool: Mutex::new(Mempool::new()),
            known_nodes: Mutex::new(known_nodes),
            blocks_in_transit: Mutex::new(Vec::new()),
        })
    }

    /// This node's announced address.
    fn addr(&self) -> String {
        self.config.listen_addr.clone()
    }

    fn is_bootstrap(&self) -> bool {
        self.config.listen_addr == self.config.bootstrap_addr
    }

    /// The UTXO index this node maintains.
    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    /// The chain store this node serves.
    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// Accept connections until the host signals termination, then flush
    /// and close the store.
    pub async fn run(self: Arc<Self>) -> Result<(), PyriteError> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(NetworkError::Io)?;
        info!(addr = %self.config.listen_addr, miner = self.config.miner.is_some(), "node listening");

        if !self.is_bootstrap() {
            let version = self.version_message()?;
            self.send(&self.config.bootstrap_addr.clone(), version).await;
        }

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_connection(stream).await {
                                warn!(%peer, error = %e, "connection handler failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = &mut shutdown => {
                    info!("termination signal, closing store");
                    self.chain.flush()?;
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), PyriteError> {
        let mut data = Vec::new();
        tokio::time::timeout(READ_TIMEOUT, stream.read_to_end(&mut data))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(NetworkError::Io)?;

        let message = match Message::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                // Malformed traffic is logged and dropped, never fatal.
                warn!(error = %e, bytes = data.len(), "ignoring malformed message");
                return Ok(());
            }
        };

        debug!(command = message.command(), "received");
        match message {
            Message::Version(payload) => self.handle_version(payload).await,
            Message::Addr(payload) => self.handle_addr(payload),
            Message::Inv(payload) => self.handle_inv(payload).await,
            Message::GetBlocks(payload) => self.handle_get_blocks(payload).await,
            Message::GetData(payload) => self.handle_get_data(payload).await,
            Message::Block(payload) => self.handle_block(payload).await,
            Message::Tx(payload) => self.handle_tx(payload).await,
        }
    }

    fn version_message(&self) -> Result<Message, PyriteError> {
        Ok(Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            best_height: self.chain.tip_height()?,
            addr_from: self.addr(),
        }))
    }

    /// Height comparison on handshake: taller peer gets a `getblocks`,
    /// shorter peer gets our `version` back, equal peers idle.
    async fn handle_version(&self, payload: VersionPayload) -> Result<(), PyriteError> {
        let our_height = self.chain.tip_height()?;
        let peer = payload.addr_from.clone();
        self.add_known_node(&peer);

        if payload.best_height > our_height {
            self.send(
                &peer,
                Message::GetBlocks(GetBlocksPayload {
                    addr_from: self.addr(),
                }),
            )
            .await;
        } else if payload.best_height < our_height {
            let version = self.version_message()?;
            self.send(&peer, version).await;
        }
        Ok(())
    }

    fn handle_addr(&self, payload: AddrPayload) -> Result<(), PyriteError> {
        for addr in payload.addresses {
            self.add_known_node(&addr);
        }
        debug!(known = self.known_nodes.lock().len(), "peer list updated");
        Ok(())
    }

    /// Reply with every block hash we have, tip first.
    async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<(), PyriteError> {
        let mut items = Vec::new();
        for block in self.chain.iter()? {
            items.push(block?.hash);
        }
        self.send(
            &payload.addr_from,
            Message::Inv(InvPayload {
                addr_from: self.addr(),
                kind: InvKind::Block,
                items,
            }),
        )
        .await;
        Ok(())
    }

    async fn handle_inv(&self, payload: InvPayload) -> Result<(), PyriteError> {
        debug!(kind = ?payload.kind, items = payload.items.len(), "inventory offered");
        match payload.kind {
            InvKind::Block => {
                let Some((first, rest)) = payload.items.split_first() else {
                    return Ok(());
                };
                *self.blocks_in_transit.lock() = rest.to_vec();
                self.send(
                    &payload.addr_from,
                    Message::GetData(GetDataPayload {
                        addr_from: self.addr(),
                        kind: InvKind::Block,
                        id: *first,
                    }),
                )
                .await;
            }
            InvKind::Tx => {
                for id in payload.items {
                    if self.mempool.lock().contains(&id) {
                        continue;
                    }
                    self.send(
                        &payload.addr_from,
                        Message::GetData(GetDataPayload {
                            addr_from: self.addr(),
                            kind: InvKind::Tx,
                            id,
                        }),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, payload: GetDataPayload) -> Result<(), PyriteError> {
        match payload.kind {
            InvKind::Block => match self.chain.get_block(&payload.id) {
                Ok(block) => {
                    self.send(
                        &payload.addr_from,
                        Message::Block(BlockPayload {
                            addr_from: self.addr(),
                            block,
                        }),
                    )
                    .await;
                }
                Err(e) => warn!(id = %payload.id, error = %e, "requested block unavailable"),
            },
            InvKind::Tx => {
                let tx = self.mempool.lock().get(&payload.id).cloned();
                if let Some(tx) = tx {
                    self.send(
                        &payload.addr_from,
                        Message::Tx(TxPayload {
                            addr_from: self.addr(),
                            tx,
                        }),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    /// Store a delivered block, evict its transactions from the mempool,
    /// and either request the next block in transit or, when the queue is
    /// drained, rebuild the UTXO index at the new tip.
    async fn handle_block(&self, payload: BlockPayload) -> Result<(), PyriteError> {
        let block = payload.block;
        if let Err(e) = self.chain.add_block(&block) {
            warn!(hash = %block.hash, error = %e, "rejected block");
            return Ok(());
        }
        self.mempool.lock().remove_confirmed(&block);

        let next = {
            let mut transit = self.blocks_in_transit.lock();
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };

        match next {
            Some(id) => {
                self.send(
                    &payload.addr_from,
                    Message::GetData(GetDataPayload {
                        addr_from: self.addr(),
                        kind: InvKind::Block,
                        id,
                    }),
                )
                .await;
            }
            None => {
                self.utxo.reindex()?;
                info!(height = self.chain.tip_height()?, "chain synchronized");
            }
        }
        Ok(())
    }

    /// Accept a gossiped transaction into the mempool; the bootstrap node
    /// relays it onward, a mining node starts digging.
    async fn handle_tx(&self, payload: TxPayload) -> Result<(), PyriteError> {
        let txid = payload.tx.id;
        let sender = payload.addr_from.clone();
        if let Err(e) = self.mempool.lock().insert(payload.tx) {
            debug!(%txid, error = %e, "mempool rejected transaction");
            return Ok(());
        }
        info!(%txid, pool = self.mempool.lock().len(), "transaction accepted");

        if self.is_bootstrap() {
            let peers = self.peers_except(&[self.addr(), sender]);
            for peer in peers {
                self.send(
                    &peer,
                    Message::Inv(InvPayload {
                        addr_from: self.addr(),
                        kind: InvKind::Tx,
                        items: vec![txid],
                    }),
                )
                .await;
            }
        }

        if self.config.miner.is_some() && !self.mempool.lock().is_empty() {
            self.mine_pending().await?;
        }
        Ok(())
    }

    /// Mine mempool transactions until the pool drains.
    ///
    /// Each round verifies every candidate against the chain and the UTXO
    /// index, drops the invalid ones, appends a fresh coinbase, and mines
    /// on a blocking task so the listener stays responsive. The mined
    /// block updates the index, evicts its transactions, and is announced
    /// to every known peer.
    async fn mine_pending(&self) -> Result<(), PyriteError> {
        let Some(miner) = self.config.miner else {
            return Ok(());
        };

        loop {
            let candidates = self.mempool.lock().transactions();
            if candidates.is_empty() {
                return Ok(());
            }

            let chain = self.chain.clone();
            let utxo = self.utxo.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                mine_candidates(&chain, &utxo, &miner, candidates)
            })
            .await
            .map_err(|e| NetworkError::Internal(e.to_string()))??;

            {
                let mut pool = self.mempool.lock();
                for id in &outcome.dropped {
                    pool.remove(id);
                }
            }
            for id in &outcome.dropped {
                warn!(txid = %id, "dropped invalid mempool transaction");
            }

            let Some(block) = outcome.block else {
                return Ok(());
            };
            self.utxo.update(&block)?;
            self.mempool.lock().remove_confirmed(&block);
            info!(hash = %block.hash, height = block.height, "mined pending transactions");

            let peers = self.peers_except(&[self.addr()]);
            for peer in peers {
                self.send(
                    &peer,
                    Message::Inv(InvPayload {
                        addr_from: self.addr(),
                        kind: InvKind::Block,
                        items: vec![block.hash],
                    }),
                )
                .await;
            }

            if self.mempool.lock().is_empty() {
                return Ok(());
            }
        }
    }

    // --- peer bookkeeping ---

    fn add_known_node(&self, addr: &str) {
        if addr == self.addr() {
            return;
        }
        let mut nodes = self.known_nodes.lock();
        if !nodes.iter().any(|n| n == addr) {
            nodes.push(addr.to_string());
        }
    }

    fn remove_known_node(&self, addr: &str) {
        self.known_nodes.lock().retain(|n| n != addr);
    }

    fn peers_except(&self, excluded: &[String]) -> Vec<String> {
        self.known_nodes
            .lock()
            .iter()
            .filter(|n| !excluded.contains(n))
            .cloned()
            .collect()
    }

    /// Fire a message at a peer; an unreachable peer is dropped from the
    /// known-nodes list and the failure is not propagated.
    async fn send(&self, addr: &str, message: Message) {
        if let Err(e) = dial_and_send(addr, &message).await {
            warn!(peer = addr, error = %e, "peer unreachable, dropping");
            self.remove_known_node(addr);
        }
    }
}

/// What one mining round produced.
struct MiningOutcome {
    block: Option<Block>,
    dropped: Vec<Hash256>,
}

/// Verify candidates, mine the valid ones under a fresh coinbase.
///
/// A candidate is dropped when its signatures fail or any of its inputs
/// is no longer unspent (a block that arrived meanwhile may have consumed
/// them).
fn mine_candidates(
    chain: &Blockchain,
    utxo: &UtxoSet,
    miner: &Address,
    candidates: Vec<Transaction>,
) -> Result<MiningOutcome, PyriteError> {
    let mut valid = Vec::new();
    let mut dropped = Vec::new();

    for tx in candidates {
        let spendable = tx
            .inputs
            .iter()
            .map(|input| utxo.contains_outpoint(&input.previous_output))
            .collect::<Result<Vec<bool>, PyriteError>>()?
            .into_iter()
            .all(|ok| ok);
        if spendable && chain.verify_tx(&tx)? {
            valid.push(tx);
        } else {
            dropped.push(tx.id);
        }
    }

    if valid.is_empty() {
        return Ok(MiningOutcome {
            block: None,
            dropped,
        });
    }

    let coinbase = Transaction::new_coinbase(miner, None)?;
    let mut txs = vec![coinbase];
    txs.extend(valid);
    let block = chain.mine_block(txs)?;

    Ok(MiningOutcome {
        block: Some(block),
        dropped,
    })
}

/// Resolve when the host asks the node to terminate (SIGINT, and SIGTERM
/// where the platform has it).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "no SIGTERM handler, falling back to ctrl-c");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Dial a peer, write one framed message, and close the write side.
async fn dial_and_send(addr: &str, message: &Message) -> Result<(), PyriteError> {
    let frame = message.encode()?;
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|_| NetworkError::PeerUnreachable(addr.to_string()))?;
    stream.write_all(&frame).await.map_err(NetworkError::Io)?;
    stream.shutdown().await.map_err(NetworkError::Io)?;
    Ok(())
}

/// Hand a locally-built transaction to a node (used by `send` without
/// `--mine`). Unlike gossip, a failure here surfaces to the caller.
pub async fn submit_transaction(
    from_addr: &str,
    node_addr: &str,
    tx: Transaction,
) -> Result<(), PyriteError> {
    let message = Message::Tx(TxPayload {
        addr_from: from_addr.to_string(),
        tx,
    });
    dial_and_send(node_addr, &message).await
}
