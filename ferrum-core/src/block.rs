//! Bloco: pacote de transações comprometido pela raiz de Merkle e
//! selado pela prova de trabalho.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use shared::{LedgerError, Result};

use crate::merkle::MerkleTree;
use crate::proof::ProofOfWork;
use crate::transaction::Transaction;

/// Bloco da cadeia Ferrum. Blocos são escritos uma única vez e nunca
/// alterados; o gênese é o único com `prev_hash` vazio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub prev_hash: Vec<u8>,
    pub transactions: Vec<Transaction>,
    pub nonce: i64,
    pub height: i64,
    pub hash: Vec<u8>,
}

impl Block {
    /// Cria e minera um bloco
    ///
    /// # Errors
    ///
    /// Retorna erro se não houver transações ou se a mineração falhar
    pub fn new(transactions: Vec<Transaction>, prev_hash: Vec<u8>, height: i64) -> Result<Self> {
        let mut block = Self {
            timestamp: Utc::now().timestamp(),
            prev_hash,
            transactions,
            nonce: 0,
            height,
            hash: Vec::new(),
        };

        let (nonce, hash) = {
            let pow = ProofOfWork::new(&block)?;
            pow.run()?
        };
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Bloco gênese: apenas a coinbase, sem antecessor
    ///
    /// # Errors
    ///
    /// Retorna erro se a mineração falhar
    pub fn genesis(coinbase: Transaction) -> Result<Self> {
        Self::new(vec![coinbase], Vec::new(), 0)
    }

    /// Raiz de Merkle sobre as serializações das transações
    ///
    /// # Errors
    ///
    /// Retorna erro se o bloco não tiver transações
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut items = Vec::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            items.push(tx.serialize()?);
        }
        let tree = MerkleTree::new(&items)?;
        Ok(tree.root_hash().to_vec())
    }

    /// Codificação binária para armazenamento e para a rede
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Decodifica um bloco serializado
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não formarem um bloco
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}
