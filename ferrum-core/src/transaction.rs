//! Modelo de transação: entradas, saídas, coinbase, assinatura e verificação.
//!
//! O identificador de uma transação é o SHA-256 da sua serialização com o
//! campo `id` zerado. Assinaturas cobrem uma *cópia aparada* por entrada,
//! com a chave pública da entrada substituída pelo hash da chave do dono da
//! saída referenciada.

use std::collections::HashMap;
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use shared::wallet::pubkey_hash_from_address;
use shared::{hash_pubkey, sha256, verify_signature, LedgerError, Result, Wallet};

use crate::utxo::UtxoSet;

/// Recompensa fixa por bloco minerado
pub const SUBSIDY: u64 = 20;

/// Entrada: referência a uma saída anterior mais a prova de posse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// ID da transação cujas saídas serão gastas (vazio em coinbase)
    pub prev_tx: Vec<u8>,
    /// Índice da saída referenciada (−1 em coinbase)
    pub out_index: i32,
    /// Assinatura r‖s sobre a cópia aparada
    pub signature: Vec<u8>,
    /// Chave pública X‖Y do dono; em coinbase, payload arbitrário do minerador
    pub pubkey: Vec<u8>,
}

impl TxInput {
    /// Verifica se a entrada foi gerada pelo dono do hash fornecido
    #[must_use]
    pub fn uses_key(&self, pubkey_hash: &[u8]) -> bool {
        hash_pubkey(&self.pubkey) == pubkey_hash
    }
}

/// Saída: valor bloqueado para um hash de chave pública
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: Vec<u8>,
}

impl TxOutput {
    /// Cria uma saída já bloqueada para o endereço
    ///
    /// # Errors
    ///
    /// Retorna erro se o endereço não decodificar
    pub fn new(value: u64, address: &str) -> Result<Self> {
        let mut output = Self {
            value,
            pubkey_hash: Vec::new(),
        };
        output.lock(address)?;
        Ok(output)
    }

    /// Bloqueia a saída: descarta a versão e o checksum do endereço
    ///
    /// # Errors
    ///
    /// Retorna erro se o endereço não decodificar
    pub fn lock(&mut self, address: &str) -> Result<()> {
        self.pubkey_hash = pubkey_hash_from_address(address)?;
        Ok(())
    }

    /// Verifica se a saída pertence ao dono do hash fornecido
    #[must_use]
    pub fn is_locked_with_key(&self, pubkey_hash: &[u8]) -> bool {
        self.pubkey_hash == pubkey_hash
    }
}

/// Transferência de valor assinada
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Coinbase: cria a recompensa do bloco para o minerador.
    /// Sem payload explícito, a entrada carrega 24 bytes aleatórios em hex.
    ///
    /// # Errors
    ///
    /// Retorna erro se o endereço do minerador não decodificar
    pub fn coinbase(to: &str, data: &str) -> Result<Self> {
        let payload = if data.is_empty() {
            let mut random = [0u8; 24];
            rand::thread_rng().fill_bytes(&mut random);
            hex::encode(random).into_bytes()
        } else {
            data.as_bytes().to_vec()
        };

        let input = TxInput {
            prev_tx: Vec::new(),
            out_index: -1,
            signature: Vec::new(),
            pubkey: payload,
        };
        let output = TxOutput::new(SUBSIDY, to)?;

        let mut tx = Self {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Nova transferência: seleciona saídas gastáveis do índice de UTXOs,
    /// gera o troco de volta ao remetente e assina todas as entradas
    ///
    /// # Errors
    ///
    /// Retorna `InsufficientFunds` se o acumulado não cobrir o valor
    pub fn new(wallet: &Wallet, to: &str, amount: u64, utxo_set: &UtxoSet<'_>) -> Result<Self> {
        let pubkey_hash = hash_pubkey(wallet.public_key());
        let (accumulated, spendable) = utxo_set.find_spendable_outputs(&pubkey_hash, amount)?;

        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: accumulated,
            });
        }

        let mut inputs = Vec::new();
        for (txid_hex, out_indices) in &spendable {
            let prev_tx = hex::decode(txid_hex)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            for &out_index in out_indices {
                inputs.push(TxInput {
                    prev_tx: prev_tx.clone(),
                    out_index,
                    signature: Vec::new(),
                    pubkey: wallet.public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TxOutput::new(amount, to)?];
        if accumulated > amount {
            // troco de volta para a própria carteira
            outputs.push(TxOutput::new(accumulated - amount, &wallet.address())?);
        }

        let mut tx = Self {
            id: Vec::new(),
            inputs,
            outputs,
        };
        tx.id = tx.hash()?;
        utxo_set.chain().sign_transaction(&mut tx, wallet)?;
        Ok(tx)
    }

    /// Detecta a coinbase pela entrada sentinela
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_tx.is_empty() && self.inputs[0].out_index == -1
    }

    /// Hash da transação: serialização com o campo `id` zerado
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn hash(&self) -> Result<Vec<u8>> {
        let mut copy = self.clone();
        copy.id = Vec::new();
        Ok(sha256(&copy.serialize()?))
    }

    /// Codificação binária determinística
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Decodifica uma transação serializada
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não formarem uma transação
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Cópia aparada: entradas sem assinatura nem chave pública
    fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx: input.prev_tx.clone(),
                out_index: input.out_index,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();

        Self {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Assina cada entrada sobre o estado da cópia aparada
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma transação referenciada estiver ausente
    pub fn sign(&mut self, wallet: &Wallet, prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&hex::encode(&input.prev_tx)) {
                return Err(LedgerError::InvalidTransaction(
                    "entrada referencia transação inexistente".to_string(),
                ));
            }
        }

        let mut trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let prev_tx = &prev_txs[&hex::encode(&trimmed.inputs[index].prev_tx)];
            let referenced = usize::try_from(trimmed.inputs[index].out_index)
                .ok()
                .and_then(|out_index| prev_tx.outputs.get(out_index))
                .ok_or_else(|| {
                    LedgerError::InvalidTransaction(
                        "entrada referencia saída inexistente".to_string(),
                    )
                })?;

            trimmed.inputs[index].signature = Vec::new();
            trimmed.inputs[index].pubkey = referenced.pubkey_hash.clone();
            trimmed.id = trimmed.hash()?;
            trimmed.inputs[index].pubkey = Vec::new();

            self.inputs[index].signature = wallet.sign(&trimmed.id)?;
        }
        Ok(())
    }

    /// Verifica todas as entradas; a coinbase é trivialmente válida
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma transação referenciada estiver ausente
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&hex::encode(&input.prev_tx)) {
                return Err(LedgerError::InvalidTransaction(
                    "entrada referencia transação inexistente".to_string(),
                ));
            }
        }

        let mut trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let prev_tx = &prev_txs[&hex::encode(&input.prev_tx)];
            let Some(referenced) = usize::try_from(input.out_index)
                .ok()
                .and_then(|out_index| prev_tx.outputs.get(out_index))
            else {
                return Ok(false);
            };

            trimmed.inputs[index].signature = Vec::new();
            trimmed.inputs[index].pubkey = referenced.pubkey_hash.clone();
            trimmed.id = trimmed.hash()?;
            trimmed.inputs[index].pubkey = Vec::new();

            if !verify_signature(&input.pubkey, &trimmed.id, &input.signature) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transação {}", hex::encode(&self.id))?;
        for (index, input) in self.inputs.iter().enumerate() {
            writeln!(f, "    Entrada {index}:")?;
            writeln!(f, "      TXID:       {}", hex::encode(&input.prev_tx))?;
            writeln!(f, "      Saída:      {}", input.out_index)?;
            writeln!(f, "      Assinatura: {}", hex::encode(&input.signature))?;
            writeln!(f, "      PubKey:     {}", hex::encode(&input.pubkey))?;
        }
        for (index, output) in self.outputs.iter().enumerate() {
            writeln!(f, "    Saída {index}:")?;
            writeln!(f, "      Valor:      {}", output.value)?;
            writeln!(f, "      PubKeyHash: {}", hex::encode(&output.pubkey_hash))?;
        }
        Ok(())
    }
}
