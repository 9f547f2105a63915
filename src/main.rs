//! CLI do nó Ferrum.
//!
//! A variável de ambiente `NODE_ID` escolhe o armazenamento por nó e a
//! porta de escuta (`localhost:<NODE_ID>`).

mod network;
mod wallets;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferrum_core::{Blockchain, ProofOfWork, Transaction, UtxoSet};
use shared::{pubkey_hash_from_address, validate_address, LedgerError, Result};

use wallets::Wallets;

#[derive(Parser)]
#[command(name = "ferrum")]
#[command(about = "Ferrum - nó blockchain UTXO com proof-of-work")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consulta o saldo de um endereço
    Getbalance(AddressArgs),
    /// Cria a blockchain e minera o bloco gênese para o endereço
    Createblockchain(AddressArgs),
    /// Envia tokens de um endereço para outro
    Send(SendArgs),
    /// Imprime os blocos da cadeia, do tip ao gênese
    Printchain,
    /// Cria uma carteira nova
    Createwallet,
    /// Lista os endereços do arquivo de carteiras
    Listaddresses,
    /// Reconstrói o índice de UTXOs varrendo a cadeia
    Reindexutxo,
    /// Inicia o servidor P2P do nó
    Startnode(StartNodeArgs),
}

#[derive(Args)]
struct AddressArgs {
    /// Endereço alvo
    #[arg(long)]
    address: String,
}

#[derive(Args)]
struct SendArgs {
    /// Endereço de origem
    #[arg(long)]
    from: String,

    /// Endereço de destino
    #[arg(long)]
    to: String,

    /// Quantidade de tokens
    #[arg(long)]
    amount: u64,

    /// Minera a transação imediatamente neste nó
    #[arg(long)]
    mine: bool,
}

#[derive(Args)]
struct StartNodeArgs {
    /// Endereço que recebe as recompensas de mineração
    #[arg(long, default_value = "")]
    miner: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("Erro: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let node_id = std::env::var("NODE_ID")
        .map_err(|_| LedgerError::Config("NODE_ID não definido no ambiente".to_string()))?;

    match cli.command {
        Commands::Getbalance(args) => get_balance(&args.address, &node_id),
        Commands::Createblockchain(args) => create_blockchain(&args.address, &node_id),
        Commands::Send(args) => send(&args, &node_id).await,
        Commands::Printchain => print_chain(&node_id),
        Commands::Createwallet => create_wallet(&node_id),
        Commands::Listaddresses => list_addresses(&node_id),
        Commands::Reindexutxo => reindex_utxo(&node_id),
        Commands::Startnode(args) => start_node(&args, &node_id).await,
    }
}

fn check_address(address: &str) -> Result<()> {
    if validate_address(address) {
        Ok(())
    } else {
        Err(LedgerError::InvalidAddress(address.to_string()))
    }
}

fn get_balance(address: &str, node_id: &str) -> Result<()> {
    check_address(address)?;

    let chain = Blockchain::open(node_id)?;
    let utxo_set = UtxoSet::new(&chain);
    let pubkey_hash = pubkey_hash_from_address(address)?;
    let balance: u64 = utxo_set
        .find_utxo(&pubkey_hash)?
        .iter()
        .map(|output| output.value)
        .sum();

    println!("Saldo de {address}: {balance}");
    Ok(())
}

fn create_blockchain(address: &str, node_id: &str) -> Result<()> {
    check_address(address)?;

    let chain = Blockchain::create(address, node_id)?;
    UtxoSet::new(&chain).reindex()?;

    println!("Blockchain criada!");
    Ok(())
}

async fn send(args: &SendArgs, node_id: &str) -> Result<()> {
    check_address(&args.from)?;
    check_address(&args.to)?;

    let mut chain = Blockchain::open(node_id)?;
    let wallets = Wallets::load(node_id)?;
    let wallet = wallets
        .get(&args.from)
        .ok_or_else(|| LedgerError::InvalidAddress(args.from.clone()))?;

    let tx = {
        let utxo_set = UtxoSet::new(&chain);
        Transaction::new(wallet, &args.to, args.amount, &utxo_set)?
    };

    if args.mine {
        let coinbase = Transaction::coinbase(&args.from, "")?;
        let block = chain.mine_block(vec![coinbase, tx])?;
        UtxoSet::new(&chain).update(&block)?;
    } else {
        network::send_transaction_to(
            network::BOOTSTRAP_NODE,
            &format!("localhost:{node_id}"),
            &tx,
        )
        .await?;
    }

    println!("{} tokens enviados de {} para {}", args.amount, args.from, args.to);
    Ok(())
}

fn print_chain(node_id: &str) -> Result<()> {
    let chain = Blockchain::open(node_id)?;

    for block in chain.iterator() {
        let block = block?;
        println!("--------");
        println!("Altura:         {}", block.height);
        println!("Hash anterior:  {}", hex::encode(&block.prev_hash));
        println!("Hash:           {}", hex::encode(&block.hash));
        let pow = ProofOfWork::new(&block)?;
        println!("Proof-of-work:  {}", pow.validate());
        for tx in &block.transactions {
            println!("{tx}");
        }
        println!("--------");
    }
    Ok(())
}

fn create_wallet(node_id: &str) -> Result<()> {
    let mut wallets = Wallets::load(node_id)?;
    let address = wallets.add_wallet()?;
    wallets.save(node_id)?;

    println!("Endereço da carteira nova: {address}");
    Ok(())
}

fn list_addresses(node_id: &str) -> Result<()> {
    let wallets = Wallets::load(node_id)?;
    for address in wallets.addresses() {
        println!("{address}");
    }
    Ok(())
}

fn reindex_utxo(node_id: &str) -> Result<()> {
    let chain = Blockchain::open(node_id)?;
    let utxo_set = UtxoSet::new(&chain);
    utxo_set.reindex()?;

    let count = utxo_set.count_transactions()?;
    println!("Reindexação concluída: {count} transações no índice de UTXOs");
    Ok(())
}

async fn start_node(args: &StartNodeArgs, node_id: &str) -> Result<()> {
    info!("🚀 starting node {node_id}");
    if !args.miner.is_empty() {
        check_address(&args.miner)?;
        info!("⛏️ mining enabled, rewards go to {}", args.miner);
    }

    let server = network::Server::new(node_id, &args.miner)?;
    server.run().await
}
