//! Pool de transações pendentes de inclusão em bloco.
//!
//! Vive na memória do processo e é acessado apenas pela tarefa de despacho
//! do servidor, por isso não carrega lock próprio.

use std::collections::HashMap;

use crate::transaction::Transaction;

/// Transações pendentes, indexadas pelo id em hexadecimal
#[derive(Debug, Default)]
pub struct Mempool {
    transactions: HashMap<String, Transaction>,
}

impl Mempool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: Transaction) {
        self.transactions.insert(hex::encode(&tx.id), tx);
    }

    #[must_use]
    pub fn get(&self, id_hex: &str) -> Option<&Transaction> {
        self.transactions.get(id_hex)
    }

    pub fn remove(&mut self, id_hex: &str) -> Option<Transaction> {
        self.transactions.remove(id_hex)
    }

    #[must_use]
    pub fn contains(&self, id_hex: &str) -> bool {
        self.transactions.contains_key(id_hex)
    }

    /// Ids pendentes no momento da chamada
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.transactions.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Wallet;

    fn pending_tx() -> Transaction {
        let wallet = Wallet::new().unwrap();
        Transaction::coinbase(&wallet.address(), "pendente").unwrap()
    }

    #[test]
    fn test_insert_get_remove() {
        let mut mempool = Mempool::new();
        assert!(mempool.is_empty());

        let tx = pending_tx();
        let id_hex = hex::encode(&tx.id);
        mempool.insert(tx.clone());

        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&id_hex));
        assert_eq!(mempool.get(&id_hex).unwrap().id, tx.id);

        let removed = mempool.remove(&id_hex).unwrap();
        assert_eq!(removed.id, tx.id);
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_reinsert_replaces() {
        let mut mempool = Mempool::new();
        let tx = pending_tx();
        mempool.insert(tx.clone());
        mempool.insert(tx);
        assert_eq!(mempool.len(), 1);
    }
}
