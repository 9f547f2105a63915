//! Persistência das carteiras do nó em arquivo JSON.
//!
//! O formato do arquivo é um detalhe da CLI; o núcleo do ledger só conhece
//! o tipo [`Wallet`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use shared::{LedgerError, Result, Wallet};

fn wallet_file(node_id: &str) -> PathBuf {
    PathBuf::from(format!("wallets_{node_id}.data"))
}

/// Coleção de carteiras indexada pelo endereço
#[derive(Default, Serialize, Deserialize)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    /// Carrega o arquivo do nó se existir; caso contrário inicia vazia
    ///
    /// # Errors
    ///
    /// Retorna erro se o arquivo existir mas não decodificar
    pub fn load(node_id: &str) -> Result<Self> {
        Self::load_from(&wallet_file(node_id))
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read(path).map_err(|e| LedgerError::Store(e.to_string()))?;
        serde_json::from_slice(&content).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Grava a coleção no arquivo do nó
    ///
    /// # Errors
    ///
    /// Retorna erro se a escrita falhar
    pub fn save(&self, node_id: &str) -> Result<()> {
        self.save_to(&wallet_file(node_id))
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let data =
            serde_json::to_vec_pretty(self).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        fs::write(path, data).map_err(|e| LedgerError::Store(e.to_string()))
    }

    /// Cria uma carteira nova e devolve o endereço
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração do par de chaves falhar
    pub fn add_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        Ok(address)
    }

    #[must_use]
    pub fn get(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    /// Endereços conhecidos pelo arquivo de carteiras
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallets_teste.data");

        let mut wallets = Wallets::default();
        let address = wallets.add_wallet().unwrap();
        wallets.save_to(&path).unwrap();

        let reloaded = Wallets::load_from(&path).unwrap();
        assert_eq!(reloaded.addresses(), vec![address.clone()]);

        // A carteira recarregada continua assinando pela mesma chave
        let original = wallets.get(&address).unwrap();
        let restored = reloaded.get(&address).unwrap();
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let wallets = Wallets::load_from(&dir.path().join("inexistente.data")).unwrap();
        assert!(wallets.addresses().is_empty());
    }
}
