//! pyrite — command-line interface to a Pyrite node.
//!
//! Wallet management, chain inspection, transfers, and the P2P listener.
//! Every node is identified by the `NODE_ID` environment variable: its
//! database lives at `./tmp/blocks_<NODE_ID>` and its wallet file at
//! `./tmp/wallets_<NODE_ID>.data`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use pyrite_core::address::Address;
use pyrite_core::constants::BOOTSTRAP_NODE;
use pyrite_core::types::Transaction;
use pyrite_node::{Blockchain, UtxoSet};
use pyrite_network::{submit_transaction, Node, NodeConfig};
use pyrite_wallet::WalletStore;

/// An educational proof-of-work cryptocurrency node.
#[derive(Parser)]
#[command(name = "pyrite")]
#[command(version, about = "Fool's gold, honest ledger.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new key pair and print its address.
    CreateWallet,
    /// List every address in this node's wallet file.
    ListAddresses,
    /// Initialize the chain, rewarding the genesis coinbase to an address.
    CreateBlockchain(AddressArgs),
    /// Sum the unspent outputs locked to an address.
    GetBalance(AddressArgs),
    /// Build and sign a transfer, then mine it locally or gossip it.
    Send(SendArgs),
    /// Walk the chain from tip to genesis, printing each block.
    PrintChain,
    /// Rebuild the UTXO index from the chain and report its size.
    ReindexUtxo,
    /// Start the P2P listener bound to localhost:<NODE_ID>.
    StartNode(StartNodeArgs),
}

#[derive(Args)]
struct AddressArgs {
    #[arg(long)]
    address: String,
}

#[derive(Args)]
struct SendArgs {
    /// Sender address; its key must be in the wallet file.
    #[arg(long)]
    from: String,
    /// Recipient address.
    #[arg(long)]
    to: String,
    /// Amount in whole coins.
    #[arg(long)]
    amount: u64,
    /// Mine the transaction into a block locally instead of sending it to
    /// the bootstrap node.
    #[arg(long)]
    mine: bool,
}

#[derive(Args)]
struct StartNodeArgs {
    /// Mine incoming transactions, sending rewards to this address.
    #[arg(long)]
    miner: Option<String>,
}

fn node_id() -> Result<String> {
    match std::env::var("NODE_ID") {
        Ok(id) if !id.is_empty() => Ok(id),
        _ => bail!("NODE_ID environment variable is not set"),
    }
}

fn db_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("./tmp/blocks_{node_id}"))
}

fn wallet_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("./tmp/wallets_{node_id}.data"))
}

fn node_addr(node_id: &str) -> String {
    format!("localhost:{node_id}")
}

fn parse_address(s: &str) -> Result<Address> {
    Address::decode(s).with_context(|| format!("invalid address: {s}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let node_id = node_id()?;

    match cli.command {
        Commands::CreateWallet => create_wallet(&node_id),
        Commands::ListAddresses => list_addresses(&node_id),
        Commands::CreateBlockchain(args) => create_blockchain(&node_id, args),
        Commands::GetBalance(args) => get_balance(&node_id, args),
        Commands::Send(args) => send(&node_id, args).await,
        Commands::PrintChain => print_chain(&node_id),
        Commands::ReindexUtxo => reindex_utxo(&node_id),
        Commands::StartNode(args) => start_node(&node_id, args).await,
    }
}

fn create_wallet(node_id: &str) -> Result<()> {
    let mut wallets = WalletStore::load_or_create(wallet_path(node_id))?;
    let address = wallets.create_wallet()?;
    println!("{address}");
    Ok(())
}

fn list_addresses(node_id: &str) -> Result<()> {
    let wallets = WalletStore::load_or_create(wallet_path(node_id))?;
    for address in wallets.addresses() {
        println!("{address}");
    }
    Ok(())
}

fn create_blockchain(node_id: &str, args: AddressArgs) -> Result<()> {
    let address = parse_address(&args.address)?;
    let chain = Arc::new(Blockchain::init(db_path(node_id), &address)?);
    let utxo = UtxoSet::new(chain);
    utxo.reindex()?;
    println!("blockchain created, genesis reward to {address}");
    Ok(())
}

fn get_balance(node_id: &str, args: AddressArgs) -> Result<()> {
    let address = parse_address(&args.address)?;
    let chain = Arc::new(Blockchain::open(db_path(node_id))?);
    let utxo = UtxoSet::new(chain);
    let balance = utxo.balance(&address.pubkey_hash())?;
    println!("balance of {address}: {balance}");
    Ok(())
}

async fn send(node_id: &str, args: SendArgs) -> Result<()> {
    let to = parse_address(&args.to)?;
    let wallets = WalletStore::load_or_create(wallet_path(node_id))?;
    let keypair = wallets
        .keypair(&args.from)
        .with_context(|| format!("sender {} is not in this wallet file", args.from))?;

    let chain = Arc::new(Blockchain::open(db_path(node_id))?);
    let utxo = UtxoSet::new(chain.clone());
    let tx = utxo.create_transfer(&keypair, &to, args.amount)?;

    if args.mine {
        let from = parse_address(&args.from)?;
        let coinbase = Transaction::new_coinbase(&from, None)?;
        let block = chain.mine_block(vec![coinbase, tx])?;
        utxo.update(&block)?;
        println!("mined block {}", block.hash);
    } else {
        submit_transaction(&node_addr(node_id), BOOTSTRAP_NODE, tx)
            .await
            .context("could not reach the bootstrap node")?;
        println!("transaction submitted to {BOOTSTRAP_NODE}");
    }
    Ok(())
}

fn print_chain(node_id: &str) -> Result<()> {
    let chain = Blockchain::open(db_path(node_id))?;
    for block in chain.iter()? {
        println!("{}", block?);
    }
    Ok(())
}

fn reindex_utxo(node_id: &str) -> Result<()> {
    let chain = Arc::new(Blockchain::open(db_path(node_id))?);
    let utxo = UtxoSet::new(chain);
    utxo.reindex()?;
    println!("UTXO index rebuilt: {} unspent outputs", utxo.count()?);
    Ok(())
}

async fn start_node(node_id: &str, args: StartNodeArgs) -> Result<()> {
    let miner = args.miner.as_deref().map(parse_address).transpose()?;
    let chain = Arc::new(Blockchain::open(db_path(node_id))?);

    let mut config = NodeConfig::new(node_addr(node_id));
    config.miner = miner;
    let node = Node::new(config, chain);
    node.run().await?;
    Ok(())
}
