//! P2P synchronization over framed TCP.
//!
//! Every message is a 12-byte zero-padded lowercase command followed by a
//! bincode payload, written over a one-shot connection that the receiver
//! reads to EOF. Inbound connections are drained by lightweight reader
//! tasks and funneled through a channel into a single dispatcher that owns
//! all mutable node state, so no handler ever races another.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ferrum_core::{Block, Blockchain, Mempool, Transaction, UtxoSet};
use shared::{LedgerError, Result};

/// Network protocol version
const PROTOCOL_VERSION: u32 = 1;

/// Fixed width of the zero-padded command field
const COMMAND_LENGTH: usize = 12;

/// Seed peer every node knows at startup
pub const BOOTSTRAP_NODE: &str = "localhost:3001";

/// Inventory kinds carried by `inv` and `getdata`
const KIND_BLOCK: &str = "block";
const KIND_TX: &str = "tx";

#[derive(Debug, Serialize, Deserialize)]
struct VersionPayload {
    addr_from: String,
    version: u32,
    best_height: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddrPayload {
    addr_list: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InvPayload {
    addr_from: String,
    kind: String,
    items: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GetBlocksPayload {
    addr_from: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GetDataPayload {
    addr_from: String,
    kind: String,
    id: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockPayload {
    addr_from: String,
    block: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TxPayload {
    addr_from: String,
    transaction: Vec<u8>,
}

fn cmd_to_bytes(cmd: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..cmd.len()].copy_from_slice(cmd.as_bytes());
    bytes
}

fn bytes_to_cmd(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|byte| **byte != 0)
        .map(|byte| *byte as char)
        .collect()
}

fn encode_request<T: Serialize>(cmd: &str, payload: &T) -> Result<Vec<u8>> {
    let mut request = cmd_to_bytes(cmd).to_vec();
    let encoded =
        bincode::serialize(payload).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    request.extend_from_slice(&encoded);
    Ok(request)
}

fn decode_payload<T: for<'de> Deserialize<'de>>(request: &[u8]) -> Result<T> {
    bincode::deserialize(&request[COMMAND_LENGTH..])
        .map_err(|e| LedgerError::Serialization(e.to_string()))
}

async fn write_message(addr: &str, data: &[u8]) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;
    stream
        .write_all(data)
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;
    stream
        .shutdown()
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;
    Ok(())
}

/// Delivers a signed transaction to a peer without a running server.
/// This is the path the CLI `send` command takes.
pub async fn send_transaction_to(addr: &str, node_address: &str, tx: &Transaction) -> Result<()> {
    let payload = TxPayload {
        addr_from: node_address.to_string(),
        transaction: tx.serialize()?,
    };
    let request = encode_request("tx", &payload)?;
    write_message(addr, &request).await
}

async fn read_request(mut stream: TcpStream, requests: mpsc::Sender<Vec<u8>>) -> Result<()> {
    let mut request = Vec::new();
    stream
        .read_to_end(&mut request)
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;

    if request.len() < COMMAND_LENGTH {
        return Err(LedgerError::Network(
            "request shorter than the command field".to_string(),
        ));
    }

    requests
        .send(request)
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))
}

/// A candidate's inputs must all be live in the UTXO index and untouched by
/// earlier selections in the same batch; anything else is a double spend
fn inputs_spendable(
    tx: &Transaction,
    utxo_set: &UtxoSet<'_>,
    consumed: &mut HashSet<(Vec<u8>, i32)>,
) -> Result<bool> {
    let mut outpoints = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        let outpoint = (input.prev_tx.clone(), input.out_index);
        if consumed.contains(&outpoint)
            || outpoints.contains(&outpoint)
            || !utxo_set.contains_output(&input.prev_tx, input.out_index)?
        {
            return Ok(false);
        }
        outpoints.push(outpoint);
    }
    consumed.extend(outpoints);
    Ok(true)
}

/// P2P node: every piece of mutable state lives here and is only touched
/// by the dispatcher task
pub struct Server {
    node_address: String,
    miner_address: String,
    known_nodes: Vec<String>,
    blocks_in_transit: Vec<Vec<u8>>,
    mempool: Mempool,
    chain: Blockchain,
}

impl Server {
    /// Opens the node's chain and seeds the peer registry
    ///
    /// # Errors
    ///
    /// Fails when the node has no chain yet
    pub fn new(node_id: &str, miner_address: &str) -> Result<Self> {
        Ok(Self {
            node_address: format!("localhost:{node_id}"),
            miner_address: miner_address.to_string(),
            known_nodes: vec![BOOTSTRAP_NODE.to_string()],
            blocks_in_transit: Vec::new(),
            mempool: Mempool::new(),
            chain: Blockchain::open(node_id)?,
        })
    }

    /// Accept loop plus dispatcher; ctrl-c flushes the store and exits
    ///
    /// # Errors
    ///
    /// Fails when the listen address cannot be bound
    pub async fn run(mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.node_address)
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        info!("🌐 node listening on {}", self.node_address);

        let (sender, mut requests) = mpsc::channel::<Vec<u8>>(64);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let requests = sender.clone();
                        tokio::spawn(async move {
                            if let Err(err) = read_request(stream, requests).await {
                                warn!("failed to read request: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        warn!("accept failed: {err}");
                        break;
                    }
                }
            }
        });

        if self.node_address != BOOTSTRAP_NODE {
            self.send_version(BOOTSTRAP_NODE).await?;
        }

        loop {
            tokio::select! {
                request = requests.recv() => {
                    match request {
                        Some(request) => {
                            if let Err(err) = self.handle_request(&request).await {
                                warn!("request handling failed: {err}");
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("🛑 shutdown signal received, closing the store");
                    break;
                }
            }
        }

        self.chain.flush()?;
        Ok(())
    }

    async fn handle_request(&mut self, request: &[u8]) -> Result<()> {
        let command = bytes_to_cmd(&request[..COMMAND_LENGTH]);
        debug!("📨 received {command} command");

        // commands are lowercase on the wire; anything else is dropped
        match command.as_str() {
            "version" => self.handle_version(request).await,
            "addr" => self.handle_addr(request).await,
            "inv" => self.handle_inv(request).await,
            "getblocks" => self.handle_get_blocks(request).await,
            "getdata" => self.handle_get_data(request).await,
            "block" => self.handle_block(request).await,
            "tx" => self.handle_tx(request).await,
            other => {
                warn!("unknown command {other:?} dropped");
                Ok(())
            }
        }
    }

    /// One-shot outbound connection; unreachable peers are forgotten
    async fn send_data(&mut self, addr: &str, data: &[u8]) -> Result<()> {
        if write_message(addr, data).await.is_err() {
            warn!("peer {addr} is not available, removing it");
            self.known_nodes.retain(|node| node != addr);
        }
        Ok(())
    }

    async fn send_version(&mut self, addr: &str) -> Result<()> {
        let payload = VersionPayload {
            addr_from: self.node_address.clone(),
            version: PROTOCOL_VERSION,
            best_height: self.chain.get_best_height()?,
        };
        let request = encode_request("version", &payload)?;
        self.send_data(addr, &request).await
    }

    async fn send_get_blocks(&mut self, addr: &str) -> Result<()> {
        let payload = GetBlocksPayload {
            addr_from: self.node_address.clone(),
        };
        let request = encode_request("getblocks", &payload)?;
        self.send_data(addr, &request).await
    }

    async fn send_get_data(&mut self, addr: &str, kind: &str, id: Vec<u8>) -> Result<()> {
        let payload = GetDataPayload {
            addr_from: self.node_address.clone(),
            kind: kind.to_string(),
            id,
        };
        let request = encode_request("getdata", &payload)?;
        self.send_data(addr, &request).await
    }

    async fn send_inv(&mut self, addr: &str, kind: &str, items: Vec<Vec<u8>>) -> Result<()> {
        let payload = InvPayload {
            addr_from: self.node_address.clone(),
            kind: kind.to_string(),
            items,
        };
        let request = encode_request("inv", &payload)?;
        self.send_data(addr, &request).await
    }

    async fn send_block(&mut self, addr: &str, block: &Block) -> Result<()> {
        let payload = BlockPayload {
            addr_from: self.node_address.clone(),
            block: block.serialize()?,
        };
        let request = encode_request("block", &payload)?;
        self.send_data(addr, &request).await
    }

    async fn send_tx(&mut self, addr: &str, tx: &Transaction) -> Result<()> {
        let payload = TxPayload {
            addr_from: self.node_address.clone(),
            transaction: tx.serialize()?,
        };
        let request = encode_request("tx", &payload)?;
        self.send_data(addr, &request).await
    }

    async fn handle_version(&mut self, request: &[u8]) -> Result<()> {
        let payload: VersionPayload = decode_payload(request)?;
        let best_height = self.chain.get_best_height()?;

        if best_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await?;
        } else if best_height > payload.best_height {
            self.send_version(&payload.addr_from).await?;
        }

        if !self.known_nodes.contains(&payload.addr_from) {
            self.known_nodes.push(payload.addr_from);
        }
        Ok(())
    }

    async fn handle_addr(&mut self, request: &[u8]) -> Result<()> {
        let payload: AddrPayload = decode_payload(request)?;
        for addr in payload.addr_list {
            if !self.known_nodes.contains(&addr) {
                self.known_nodes.push(addr);
            }
        }
        info!("{} known nodes", self.known_nodes.len());

        for node in self.known_nodes.clone() {
            if node != self.node_address {
                self.send_get_blocks(&node).await?;
            }
        }
        Ok(())
    }

    async fn handle_get_blocks(&mut self, request: &[u8]) -> Result<()> {
        let payload: GetBlocksPayload = decode_payload(request)?;
        let hashes = self.chain.get_block_hashes()?;
        self.send_inv(&payload.addr_from, KIND_BLOCK, hashes).await
    }

    async fn handle_inv(&mut self, request: &[u8]) -> Result<()> {
        let payload: InvPayload = decode_payload(request)?;
        info!(
            "📦 inventory with {} item(s) of kind {}",
            payload.items.len(),
            payload.kind
        );

        match payload.kind.as_str() {
            KIND_BLOCK => {
                if payload.items.is_empty() {
                    return Ok(());
                }
                self.blocks_in_transit = payload.items;

                let block_hash = self.blocks_in_transit[0].clone();
                self.send_get_data(&payload.addr_from, KIND_BLOCK, block_hash.clone())
                    .await?;
                self.blocks_in_transit.retain(|hash| hash != &block_hash);
            }
            KIND_TX => {
                let Some(tx_id) = payload.items.first() else {
                    return Ok(());
                };
                if !self.mempool.contains(&hex::encode(tx_id)) {
                    self.send_get_data(&payload.addr_from, KIND_TX, tx_id.clone())
                        .await?;
                }
            }
            other => warn!("unknown inventory kind {other:?}"),
        }
        Ok(())
    }

    async fn handle_get_data(&mut self, request: &[u8]) -> Result<()> {
        let payload: GetDataPayload = decode_payload(request)?;

        match payload.kind.as_str() {
            KIND_BLOCK => {
                // requests for unknown blocks are dropped silently
                match self.chain.get_block(&payload.id) {
                    Ok(block) => self.send_block(&payload.addr_from, &block).await?,
                    Err(LedgerError::NotFound) => {}
                    Err(err) => return Err(err),
                }
            }
            KIND_TX => {
                let tx = self.mempool.get(&hex::encode(&payload.id)).cloned();
                if let Some(tx) = tx {
                    self.send_tx(&payload.addr_from, &tx).await?;
                }
            }
            other => warn!("unknown getdata kind {other:?}"),
        }
        Ok(())
    }

    async fn handle_block(&mut self, request: &[u8]) -> Result<()> {
        let payload: BlockPayload = decode_payload(request)?;
        let block = Block::deserialize(&payload.block)?;
        info!("⛓️ received block {}", hex::encode(&block.hash));
        self.chain.add_block(&block)?;

        if let Some(block_hash) = self.blocks_in_transit.first().cloned() {
            self.send_get_data(&payload.addr_from, KIND_BLOCK, block_hash)
                .await?;
            self.blocks_in_transit.remove(0);
        } else {
            // catch-up finished; rebuild the UTXO index from the new chain
            UtxoSet::new(&self.chain).reindex()?;
        }
        Ok(())
    }

    async fn handle_tx(&mut self, request: &[u8]) -> Result<()> {
        let payload: TxPayload = decode_payload(request)?;
        let tx = Transaction::deserialize(&payload.transaction)?;
        self.mempool.insert(tx.clone());
        info!(
            "💸 transaction {} in the mempool ({} pending)",
            hex::encode(&tx.id),
            self.mempool.len()
        );

        if self.node_address == BOOTSTRAP_NODE {
            // only the seed node relays transactions; everyone else mines
            for node in self.known_nodes.clone() {
                if node != self.node_address && node != payload.addr_from {
                    self.send_inv(&node, KIND_TX, vec![tx.id.clone()]).await?;
                }
            }
        } else if self.mempool.len() >= 2 && !self.miner_address.is_empty() {
            self.mine_pending().await?;
        }
        Ok(())
    }

    /// Mines verified mempool entries until the pool drains
    async fn mine_pending(&mut self) -> Result<()> {
        loop {
            let candidates = {
                let utxo_set = UtxoSet::new(&self.chain);
                let mut consumed = HashSet::new();
                let mut selected = Vec::new();

                for id in self.mempool.ids() {
                    let Some(tx) = self.mempool.get(&id) else {
                        continue;
                    };
                    if !self.chain.verify_transaction(tx)? {
                        warn!("skipping transaction {id} with an invalid signature");
                        continue;
                    }
                    if !inputs_spendable(tx, &utxo_set, &mut consumed)? {
                        warn!("skipping transaction {id} that spends an unavailable output");
                        continue;
                    }
                    selected.push(tx.clone());
                }
                selected
            };

            if candidates.is_empty() {
                info!("no valid transactions to mine");
                return Ok(());
            }

            let coinbase = Transaction::coinbase(&self.miner_address, "")?;
            let mut transactions = candidates;
            transactions.push(coinbase);

            let new_block = self.chain.mine_block(transactions)?;
            UtxoSet::new(&self.chain).reindex()?;
            info!("⛏️ new block {} mined", hex::encode(&new_block.hash));

            for tx in &new_block.transactions {
                self.mempool.remove(&hex::encode(&tx.id));
            }

            for node in self.known_nodes.clone() {
                if node != self.node_address {
                    self.send_inv(&node, KIND_BLOCK, vec![new_block.hash.clone()])
                        .await?;
                }
            }

            if self.mempool.is_empty() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_framing_roundtrip() {
        for cmd in ["version", "addr", "inv", "getblocks", "getdata", "block", "tx"] {
            let bytes = cmd_to_bytes(cmd);
            assert_eq!(bytes.len(), COMMAND_LENGTH);
            assert_eq!(bytes_to_cmd(&bytes), cmd);
            // zero-padded to the fixed width
            assert!(bytes[cmd.len()..].iter().all(|byte| *byte == 0));
        }
    }

    #[test]
    fn test_mixed_case_commands_differ() {
        // the dispatcher matches exact lowercase spellings, so the legacy
        // mixed-case forms never reach a handler
        assert_ne!(bytes_to_cmd(&cmd_to_bytes("getBlocks")), "getblocks");
        assert_ne!(bytes_to_cmd(&cmd_to_bytes("getData")), "getdata");
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = VersionPayload {
            addr_from: "localhost:3001".to_string(),
            version: PROTOCOL_VERSION,
            best_height: 7,
        };
        let request = encode_request("version", &payload).unwrap();
        assert_eq!(bytes_to_cmd(&request[..COMMAND_LENGTH]), "version");

        let decoded: VersionPayload = decode_payload(&request).unwrap();
        assert_eq!(decoded.addr_from, payload.addr_from);
        assert_eq!(decoded.version, payload.version);
        assert_eq!(decoded.best_height, payload.best_height);
    }

    #[test]
    fn test_inv_payload_roundtrip() {
        let payload = InvPayload {
            addr_from: "localhost:3000".to_string(),
            kind: KIND_BLOCK.to_string(),
            items: vec![vec![1u8; 32], vec![2u8; 32]],
        };
        let request = encode_request("inv", &payload).unwrap();
        let decoded: InvPayload = decode_payload(&request).unwrap();
        assert_eq!(decoded.items, payload.items);
        assert_eq!(decoded.kind, KIND_BLOCK);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let request = cmd_to_bytes("version").to_vec();
        assert!(decode_payload::<VersionPayload>(&request).is_err());
    }
}
