//! Cadeia persistente: mapeamento hash → bloco em um armazenamento
//! chave-valor embutido, mais o ponteiro `lh` para o tip.
//!
//! O armazenamento é exclusivo por nó; a cadeia e o índice de UTXOs
//! compartilham o mesmo handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sled::{Batch, Db};
use tracing::info;

use shared::{LedgerError, Result, Wallet};

use crate::block::Block;
use crate::transaction::{Transaction, TxOutput};

/// Chave distinta que guarda o hash do tip
const LAST_HASH_KEY: &[u8] = b"lh";

/// Payload da coinbase do bloco gênese
const GENESIS_DATA: &str = "Bloco genese da rede Ferrum";

/// Cadeia de blocos content-addressed com tip persistido
pub struct Blockchain {
    db: Db,
    last_hash: Vec<u8>,
}

fn store_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("blocks_{node_id}"))
}

pub(crate) fn store_err(err: sled::Error) -> LedgerError {
    LedgerError::Store(err.to_string())
}

fn is_lock_error(err: &sled::Error) -> bool {
    matches!(err, sled::Error::Io(_)) && err.to_string().to_lowercase().contains("lock")
}

/// Abre o armazenamento com uma única tentativa de recuperação: um artefato
/// de lock abandonado é truncado antes da segunda abertura
fn open_store(path: &Path) -> Result<Db> {
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(first) => {
            let stale_lock = path.join("db.lck");
            if stale_lock.exists() {
                std::fs::write(&stale_lock, b"").map_err(|e| LedgerError::Store(e.to_string()))?;
            }
            match sled::open(path) {
                Ok(db) => Ok(db),
                Err(_) if is_lock_error(&first) => Err(LedgerError::StoreLocked),
                Err(err) => Err(store_err(err)),
            }
        }
    }
}

impl Blockchain {
    /// Verifica se já existe uma cadeia no diretório do nó
    #[must_use]
    pub fn exists(node_id: &str) -> bool {
        Self::exists_at(&store_path(node_id))
    }

    /// Verifica se já existe uma cadeia no caminho fornecido
    #[must_use]
    pub fn exists_at(path: &Path) -> bool {
        path.join("db").exists()
    }

    /// Cria a cadeia com o bloco gênese financiado pela coinbase
    ///
    /// # Errors
    ///
    /// Retorna `ChainExists` se o nó já tiver uma cadeia
    pub fn create(address: &str, node_id: &str) -> Result<Self> {
        Self::create_at(&store_path(node_id), address)
    }

    /// Variante de [`Blockchain::create`] com caminho explícito
    ///
    /// # Errors
    ///
    /// Retorna `ChainExists` se o caminho já tiver uma cadeia
    pub fn create_at(path: &Path, address: &str) -> Result<Self> {
        if Self::exists_at(path) {
            return Err(LedgerError::ChainExists);
        }

        let db = open_store(path)?;
        let coinbase = Transaction::coinbase(address, GENESIS_DATA)?;
        let genesis = Block::genesis(coinbase)?;
        info!(hash = %hex::encode(&genesis.hash), "bloco gênese criado");

        let mut batch = Batch::default();
        batch.insert(genesis.hash.clone(), genesis.serialize()?);
        batch.insert(LAST_HASH_KEY, genesis.hash.clone());
        db.apply_batch(batch).map_err(store_err)?;

        Ok(Self {
            last_hash: genesis.hash,
            db,
        })
    }

    /// Continua uma cadeia existente
    ///
    /// # Errors
    ///
    /// Retorna `ChainNotFound` se o nó ainda não tiver uma cadeia
    pub fn open(node_id: &str) -> Result<Self> {
        Self::open_at(&store_path(node_id))
    }

    /// Variante de [`Blockchain::open`] com caminho explícito
    ///
    /// # Errors
    ///
    /// Retorna `ChainNotFound` se o caminho não tiver uma cadeia
    pub fn open_at(path: &Path) -> Result<Self> {
        if !Self::exists_at(path) {
            return Err(LedgerError::ChainNotFound);
        }

        let db = open_store(path)?;
        let last_hash = db
            .get(LAST_HASH_KEY)
            .map_err(store_err)?
            .ok_or(LedgerError::ChainNotFound)?
            .to_vec();
        Ok(Self { db, last_hash })
    }

    /// Minera um bloco com as transações fornecidas.
    /// O bloco e o ponteiro `lh` são gravados em um único lote atômico.
    ///
    /// # Errors
    ///
    /// Retorna `InvalidTransaction` se alguma assinatura não verificar
    pub fn mine_block(&mut self, transactions: Vec<Transaction>) -> Result<Block> {
        for tx in &transactions {
            if tx.is_coinbase() {
                continue;
            }
            if !self.verify_transaction(tx)? {
                return Err(LedgerError::InvalidTransaction(format!(
                    "assinatura inválida em {}",
                    hex::encode(&tx.id)
                )));
            }
        }

        let best_height = self.get_best_height()?;
        let block = Block::new(transactions, self.last_hash.clone(), best_height + 1)?;

        let mut batch = Batch::default();
        batch.insert(block.hash.clone(), block.serialize()?);
        batch.insert(LAST_HASH_KEY, block.hash.clone());
        self.db.apply_batch(batch).map_err(store_err)?;

        self.last_hash = block.hash.clone();
        Ok(block)
    }

    /// Escrita idempotente de um bloco recebido da rede.
    /// O tip só avança para alturas estritamente maiores; empates ficam
    /// com o bloco atual.
    ///
    /// # Errors
    ///
    /// Retorna erro se o armazenamento falhar
    pub fn add_block(&mut self, block: &Block) -> Result<()> {
        if self.db.contains_key(&block.hash).map_err(store_err)? {
            return Ok(());
        }

        self.db
            .insert(block.hash.clone(), block.serialize()?)
            .map_err(store_err)?;

        let best_height = self.get_best_height()?;
        if block.height > best_height {
            self.db
                .insert(LAST_HASH_KEY, block.hash.clone())
                .map_err(store_err)?;
            self.last_hash = block.hash.clone();
        }
        Ok(())
    }

    /// Busca um bloco pelo hash
    ///
    /// # Errors
    ///
    /// Retorna `NotFound` se o bloco não estiver armazenado
    pub fn get_block(&self, hash: &[u8]) -> Result<Block> {
        let data = self
            .db
            .get(hash)
            .map_err(store_err)?
            .ok_or(LedgerError::NotFound)?;
        Block::deserialize(&data)
    }

    /// Altura do tip atual
    ///
    /// # Errors
    ///
    /// Retorna erro se o tip não resolver para um bloco armazenado
    pub fn get_best_height(&self) -> Result<i64> {
        Ok(self.get_block(&self.last_hash)?.height)
    }

    /// Hashes de todos os blocos, do tip ao gênese
    ///
    /// # Errors
    ///
    /// Retorna erro se a travessia encontrar um bloco ausente
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut hashes = Vec::new();
        for block in self.iterator() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Varredura linear do tip ao gênese em busca de uma transação
    ///
    /// # Errors
    ///
    /// Retorna `NotFound` se a transação não estiver em nenhum bloco
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            for tx in block?.transactions {
                if tx.id == id {
                    return Ok(tx);
                }
            }
        }
        Err(LedgerError::NotFound)
    }

    fn previous_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let prev = self.find_transaction(&input.prev_tx).map_err(|_| {
                LedgerError::InvalidTransaction(
                    "entrada referencia transação fora da cadeia".to_string(),
                )
            })?;
            prev_txs.insert(hex::encode(&prev.id), prev);
        }
        Ok(prev_txs)
    }

    /// Assina uma transação buscando as transações referenciadas na cadeia
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma transação referenciada estiver ausente
    pub fn sign_transaction(&self, tx: &mut Transaction, wallet: &Wallet) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(wallet, &prev_txs)
    }

    /// Verifica uma transação contra as saídas referenciadas na cadeia
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma transação referenciada estiver ausente
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Mapa txid → saídas não gastas com seus índices originais.
    /// A travessia do tip ao gênese encontra os gastos antes das saídas
    /// que eles consomem.
    ///
    /// # Errors
    ///
    /// Retorna erro se a travessia falhar
    pub fn find_unspent_outputs(&self) -> Result<HashMap<String, Vec<(i32, TxOutput)>>> {
        let mut unspent: HashMap<String, Vec<(i32, TxOutput)>> = HashMap::new();
        let mut spent: HashMap<String, Vec<i32>> = HashMap::new();

        for block in self.iterator() {
            for tx in &block?.transactions {
                let txid = hex::encode(&tx.id);

                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = i32::try_from(index).map_err(|_| {
                        LedgerError::InvalidTransaction("índice de saída excessivo".to_string())
                    })?;
                    if spent.get(&txid).is_some_and(|outs| outs.contains(&index)) {
                        continue;
                    }
                    unspent
                        .entry(txid.clone())
                        .or_default()
                        .push((index, output.clone()));
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(hex::encode(&input.prev_tx))
                            .or_default()
                            .push(input.out_index);
                    }
                }
            }
        }
        Ok(unspent)
    }

    /// Percorre a cadeia do tip ao gênese
    #[must_use]
    pub fn iterator(&self) -> ChainIterator<'_> {
        ChainIterator {
            current_hash: self.last_hash.clone(),
            db: &self.db,
        }
    }

    /// Hash do tip atual
    #[must_use]
    pub fn last_hash(&self) -> &[u8] {
        &self.last_hash
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// Força a persistência de tudo que está pendente
    ///
    /// # Errors
    ///
    /// Retorna erro se o flush do armazenamento falhar
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(store_err)?;
        Ok(())
    }
}

/// Iterador que segue os links de `prev_hash`; o gênese é visitado por
/// último e a travessia termina no seu `prev_hash` vazio
pub struct ChainIterator<'a> {
    current_hash: Vec<u8>,
    db: &'a Db,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }

        let data = match self.db.get(&self.current_hash) {
            Ok(Some(data)) => data,
            Ok(None) => return Some(Err(LedgerError::NotFound)),
            Err(err) => return Some(Err(store_err(err))),
        };

        match Block::deserialize(&data) {
            Ok(block) => {
                self.current_hash = block.prev_hash.clone();
                Some(Ok(block))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
