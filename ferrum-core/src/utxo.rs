//! Índice persistente de saídas não gastas.
//!
//! As entradas vivem no mesmo armazenamento da cadeia, sob o prefixo
//! `UTXOSet-`, chaveadas pelo id da transação. Cada valor é a lista das
//! saídas ainda não gastas daquela transação com os índices originais
//! preservados, de modo que o gasto de uma saída não desloca as demais.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sled::Batch;

use shared::{LedgerError, Result};

use crate::block::Block;
use crate::chain::{store_err, Blockchain};
use crate::transaction::TxOutput;

/// Prefixo das entradas do índice no armazenamento compartilhado
const UTXO_PREFIX: &[u8] = b"UTXOSet-";

/// Máximo de chaves removidas por lote durante o reindex
const BATCH_DELETE_SIZE: usize = 100_000;

/// Saídas não gastas de uma transação, com seus índices originais
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOutputs {
    pub outputs: Vec<(i32, TxOutput)>,
}

impl StoredOutputs {
    /// Codificação binária para o armazenamento
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Decodifica uma entrada do índice
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não formarem uma lista de saídas
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

/// Visão do índice de UTXOs sobre o armazenamento da cadeia
pub struct UtxoSet<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoSet<'a> {
    #[must_use]
    pub const fn new(chain: &'a Blockchain) -> Self {
        Self { chain }
    }

    /// Cadeia cujo armazenamento este índice compartilha
    #[must_use]
    pub const fn chain(&self) -> &'a Blockchain {
        self.chain
    }

    fn prefixed_key(txid: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(UTXO_PREFIX.len() + txid.len());
        key.extend_from_slice(UTXO_PREFIX);
        key.extend_from_slice(txid);
        key
    }

    /// Apaga o índice inteiro e o reconstrói varrendo a cadeia
    ///
    /// # Errors
    ///
    /// Retorna erro se a varredura ou as escritas falharem
    pub fn reindex(&self) -> Result<()> {
        self.delete_by_prefix()?;

        let unspent = self.chain.find_unspent_outputs()?;
        let db = self.chain.db();
        for (txid_hex, outputs) in unspent {
            let txid =
                hex::decode(&txid_hex).map_err(|e| LedgerError::Serialization(e.to_string()))?;
            let entry = StoredOutputs { outputs };
            db.insert(Self::prefixed_key(&txid), entry.serialize()?)
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Aplica um bloco ao índice: remove os índices consumidos pelas
    /// entradas e registra as saídas das transações novas
    ///
    /// # Errors
    ///
    /// Retorna `NotFound` se uma entrada consumir uma saída fora do índice
    pub fn update(&self, block: &Block) -> Result<()> {
        let db = self.chain.db();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = Self::prefixed_key(&input.prev_tx);
                    let data = db
                        .get(&key)
                        .map_err(store_err)?
                        .ok_or(LedgerError::NotFound)?;
                    let stored = StoredOutputs::deserialize(&data)?;

                    let remaining: Vec<(i32, TxOutput)> = stored
                        .outputs
                        .into_iter()
                        .filter(|(index, _)| *index != input.out_index)
                        .collect();

                    if remaining.is_empty() {
                        db.remove(&key).map_err(store_err)?;
                    } else {
                        let entry = StoredOutputs { outputs: remaining };
                        db.insert(key, entry.serialize()?).map_err(store_err)?;
                    }
                }
            }

            let outputs = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| {
                    i32::try_from(index)
                        .map(|index| (index, output.clone()))
                        .map_err(|_| {
                            LedgerError::InvalidTransaction("índice de saída excessivo".to_string())
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let entry = StoredOutputs { outputs };
            db.insert(Self::prefixed_key(&tx.id), entry.serialize()?)
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Seleção first-fit de saídas do dono até cobrir o valor pedido.
    /// Retorna o acumulado e o mapa txid (hex) → índices escolhidos.
    ///
    /// # Errors
    ///
    /// Retorna erro se a varredura do prefixo falhar
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<i32>>)> {
        let mut spendable: HashMap<String, Vec<i32>> = HashMap::new();
        let mut accumulated = 0u64;

        for entry in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (key, value) = entry.map_err(store_err)?;
            let txid_hex = hex::encode(&key[UTXO_PREFIX.len()..]);
            let stored = StoredOutputs::deserialize(&value)?;

            for (index, output) in &stored.outputs {
                if output.is_locked_with_key(pubkey_hash) && accumulated < amount {
                    accumulated += output.value;
                    spendable.entry(txid_hex.clone()).or_default().push(*index);
                }
            }
        }

        Ok((accumulated, spendable))
    }

    /// Todas as saídas não gastas pertencentes ao dono
    ///
    /// # Errors
    ///
    /// Retorna erro se a varredura do prefixo falhar
    pub fn find_utxo(&self, pubkey_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut utxos = Vec::new();

        for entry in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (_, value) = entry.map_err(store_err)?;
            let stored = StoredOutputs::deserialize(&value)?;
            for (_, output) in stored.outputs {
                if output.is_locked_with_key(pubkey_hash) {
                    utxos.push(output);
                }
            }
        }
        Ok(utxos)
    }

    /// Verifica se a saída (txid, índice) continua não gasta
    ///
    /// # Errors
    ///
    /// Retorna erro se a leitura do índice falhar
    pub fn contains_output(&self, txid: &[u8], out_index: i32) -> Result<bool> {
        let Some(data) = self
            .chain
            .db()
            .get(Self::prefixed_key(txid))
            .map_err(store_err)?
        else {
            return Ok(false);
        };
        let stored = StoredOutputs::deserialize(&data)?;
        Ok(stored.outputs.iter().any(|(index, _)| *index == out_index))
    }

    /// Número de transações com saídas não gastas
    ///
    /// # Errors
    ///
    /// Retorna erro se a varredura do prefixo falhar
    pub fn count_transactions(&self) -> Result<usize> {
        let mut counter = 0;
        for entry in self.chain.db().scan_prefix(UTXO_PREFIX) {
            entry.map_err(store_err)?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Remove todas as entradas do prefixo em lotes limitados
    fn delete_by_prefix(&self) -> Result<()> {
        let db = self.chain.db();
        let mut batch = Batch::default();
        let mut collected = 0usize;

        for entry in db.scan_prefix(UTXO_PREFIX) {
            let (key, _) = entry.map_err(store_err)?;
            batch.remove(key);
            collected += 1;
            if collected == BATCH_DELETE_SIZE {
                db.apply_batch(std::mem::take(&mut batch))
                    .map_err(store_err)?;
                collected = 0;
            }
        }

        if collected > 0 {
            db.apply_batch(batch).map_err(store_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Transaction, SUBSIDY};
    use shared::{hash_pubkey, Wallet};
    use tempfile::TempDir;

    fn new_chain(dir: &TempDir, wallet: &Wallet) -> Blockchain {
        let chain =
            Blockchain::create_at(&dir.path().join("blocks"), &wallet.address()).unwrap();
        UtxoSet::new(&chain).reindex().unwrap();
        chain
    }

    fn snapshot(chain: &Blockchain) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = chain
            .db()
            .scan_prefix(UTXO_PREFIX)
            .map(|entry| {
                let (key, value) = entry.unwrap();
                (key.to_vec(), value.to_vec())
            })
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn test_genesis_reindex() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new().unwrap();
        let chain = new_chain(&dir, &alice);
        let utxo_set = UtxoSet::new(&chain);

        assert_eq!(utxo_set.count_transactions().unwrap(), 1);

        let utxos = utxo_set
            .find_utxo(&hash_pubkey(alice.public_key()))
            .unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value, SUBSIDY);
    }

    #[test]
    fn test_find_spendable_outputs_accumulates() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new().unwrap();
        let chain = new_chain(&dir, &alice);
        let utxo_set = UtxoSet::new(&chain);
        let pubkey_hash = hash_pubkey(alice.public_key());

        let (accumulated, spendable) = utxo_set.find_spendable_outputs(&pubkey_hash, 5).unwrap();
        assert!(accumulated >= 5);
        assert_eq!(spendable.len(), 1);

        // Todos os índices selecionados pertencem ao dono pedido
        for (txid_hex, indices) in &spendable {
            let txid = hex::decode(txid_hex).unwrap();
            for index in indices {
                assert!(utxo_set.contains_output(&txid, *index).unwrap());
            }
        }

        // Pedido acima do saldo total devolve o acumulado disponível
        let (accumulated, _) = utxo_set
            .find_spendable_outputs(&pubkey_hash, SUBSIDY * 10)
            .unwrap();
        assert_eq!(accumulated, SUBSIDY);
    }

    #[test]
    fn test_update_spends_and_creates() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let mut chain = new_chain(&dir, &alice);

        let tx = {
            let utxo_set = UtxoSet::new(&chain);
            Transaction::new(&alice, &bob.address(), 7, &utxo_set).unwrap()
        };
        let coinbase = Transaction::coinbase(&alice.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase, tx]).unwrap();

        let utxo_set = UtxoSet::new(&chain);
        utxo_set.update(&block).unwrap();

        let alice_balance: u64 = utxo_set
            .find_utxo(&hash_pubkey(alice.public_key()))
            .unwrap()
            .iter()
            .map(|out| out.value)
            .sum();
        let bob_balance: u64 = utxo_set
            .find_utxo(&hash_pubkey(bob.public_key()))
            .unwrap()
            .iter()
            .map(|out| out.value)
            .sum();

        // 20 do gênese − 7 enviados + 20 da coinbase nova
        assert_eq!(alice_balance, SUBSIDY - 7 + SUBSIDY);
        assert_eq!(bob_balance, 7);
    }

    #[test]
    fn test_update_equals_reindex() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let mut chain = new_chain(&dir, &alice);

        // Alguns blocos com transferências variadas
        for amount in [3u64, 5, 8] {
            let tx = {
                let utxo_set = UtxoSet::new(&chain);
                Transaction::new(&alice, &bob.address(), amount, &utxo_set).unwrap()
            };
            let coinbase = Transaction::coinbase(&alice.address(), "").unwrap();
            let block = chain.mine_block(vec![coinbase, tx]).unwrap();
            UtxoSet::new(&chain).update(&block).unwrap();
        }

        let incremental = snapshot(&chain);
        UtxoSet::new(&chain).reindex().unwrap();
        let rebuilt = snapshot(&chain);

        // Aplicação incremental e reconstrução total são byte a byte iguais
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn test_consumed_entry_disappears() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let mut chain = new_chain(&dir, &alice);

        let genesis_txid = chain
            .iterator()
            .last()
            .unwrap()
            .unwrap()
            .transactions[0]
            .id
            .clone();

        // Gasta o valor inteiro do gênese, sem troco
        let tx = {
            let utxo_set = UtxoSet::new(&chain);
            Transaction::new(&alice, &bob.address(), SUBSIDY, &utxo_set).unwrap()
        };
        let coinbase = Transaction::coinbase(&alice.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase, tx]).unwrap();

        let utxo_set = UtxoSet::new(&chain);
        utxo_set.update(&block).unwrap();

        assert!(!utxo_set.contains_output(&genesis_txid, 0).unwrap());
    }
}
