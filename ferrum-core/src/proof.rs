//! Prova de trabalho.
//!
//! O hash do cabeçalho, interpretado como inteiro big-endian de 256 bits,
//! precisa ser estritamente menor que o alvo `1 << (256 − DIFFICULTY)`.
//! A dificuldade é fixa; o ajuste dinâmico fica fora do protocolo.

use num_bigint::BigUint;

use shared::{sha256, LedgerError, Result};

use crate::block::Block;

/// Dificuldade fixa da rede
pub const DIFFICULTY: u32 = 20;

/// Prova de trabalho de um bloco
pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    /// Prepara a prova calculando o alvo e a raiz de Merkle do bloco
    ///
    /// # Errors
    ///
    /// Retorna erro se o bloco não tiver transações
    pub fn new(block: &'a Block) -> Result<Self> {
        let target = BigUint::from(1u32) << (256 - DIFFICULTY as usize);
        let merkle_root = block.hash_transactions()?;
        Ok(Self {
            block,
            merkle_root,
            target,
        })
    }

    /// Cabeçalho: prev_hash ‖ merkle_root ‖ nonce ‖ dificuldade,
    /// inteiros em big-endian de 8 bytes
    fn header(&self, nonce: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.block.prev_hash.len() + self.merkle_root.len() + 16);
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&self.merkle_root);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&i64::from(DIFFICULTY).to_be_bytes());
        data
    }

    /// Procura um nonce a partir de zero até satisfazer o alvo
    ///
    /// # Errors
    ///
    /// Retorna erro se o espaço positivo de nonce se esgotar
    pub fn run(&self) -> Result<(i64, Vec<u8>)> {
        for nonce in 0..i64::MAX {
            let hash = sha256(&self.header(nonce));
            if BigUint::from_bytes_be(&hash) < self.target {
                return Ok((nonce, hash));
            }
        }
        Err(LedgerError::PowFailure)
    }

    /// Reavalia o hash com o nonce gravado no bloco
    #[must_use]
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.header(self.block.nonce));
        BigUint::from_bytes_be(&hash) < self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use shared::Wallet;

    fn mined_block() -> Block {
        let address = Wallet::new().expect("carteira").address();
        let coinbase = Transaction::coinbase(&address, "pow-teste").expect("coinbase");
        Block::new(vec![coinbase], Vec::new(), 0).expect("bloco minerado")
    }

    #[test]
    fn test_mined_block_validates() {
        let block = mined_block();
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(pow.validate());
    }

    #[test]
    fn test_hash_below_target() {
        let block = mined_block();
        let target = BigUint::from(1u32) << (256 - DIFFICULTY as usize);
        assert!(BigUint::from_bytes_be(&block.hash) < target);
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let mut block = mined_block();
        block.nonce += 1;
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(!pow.validate());
    }

    #[test]
    fn test_tampered_transactions_fail() {
        let mut block = mined_block();
        block.transactions[0].outputs[0].value += 1;
        let pow = ProofOfWork::new(&block).unwrap();
        assert!(!pow.validate());
    }

    #[test]
    fn test_header_changes_with_nonce() {
        let block = mined_block();
        let pow = ProofOfWork::new(&block).unwrap();
        assert_ne!(pow.header(0), pow.header(1));
    }
}
