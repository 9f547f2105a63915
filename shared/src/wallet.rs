//! Carteiras e endereços base58.
//!
//! Um endereço é a codificação base58 de 25 bytes:
//! versão(1) ‖ ripemd160(sha256(pubkey))(20) ‖ checksum(4).
//! Base58 omite os caracteres ambíguos 0, O, l, I, + e / para que endereços
//! digitados à mão não sejam mal interpretados.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::KeyPair;
use crate::error::LedgerError;
use crate::hash::{checksum, hash_pubkey, CHECKSUM_LENGTH};
use crate::Result;

/// Byte de versão prefixado ao hash da chave pública
pub const ADDRESS_VERSION: u8 = 0x00;

/// Carteira: par de chaves P-256 cujo hash da chave pública é o endereço
#[derive(Clone, Serialize, Deserialize)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    /// Gera uma carteira nova
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração do par de chaves falhar
    pub fn new() -> Result<Self> {
        let pair = KeyPair::generate()?;
        Ok(Self {
            pkcs8: pair.pkcs8().to_vec(),
            public_key: pair.public_key().to_vec(),
        })
    }

    /// Chave pública X‖Y da carteira
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Assina uma mensagem com a chave privada da carteira
    ///
    /// # Errors
    ///
    /// Retorna erro se o material de chave persistido estiver corrompido
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        KeyPair::from_pkcs8(self.pkcs8.clone())?.sign(message)
    }

    /// Endereço base58 derivado da chave pública
    #[must_use]
    pub fn address(&self) -> String {
        address_from_pubkey_hash(&hash_pubkey(&self.public_key))
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        self.pkcs8.zeroize();
    }
}

/// Monta o endereço base58 a partir de um hash de chave pública
#[must_use]
pub fn address_from_pubkey_hash(pubkey_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + pubkey_hash.len() + CHECKSUM_LENGTH);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pubkey_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Extrai o hash da chave pública: descarta a versão e o checksum
///
/// # Errors
///
/// Retorna erro se o endereço não decodificar ou for curto demais
pub fn pubkey_hash_from_address(address: &str) -> Result<Vec<u8>> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| LedgerError::InvalidAddress(address.to_string()))?;
    if decoded.len() <= 1 + CHECKSUM_LENGTH {
        return Err(LedgerError::InvalidAddress(address.to_string()));
    }
    Ok(decoded[1..decoded.len() - CHECKSUM_LENGTH].to_vec())
}

/// Valida o checksum embutido em um endereço
#[must_use]
pub fn validate_address(address: &str) -> bool {
    let Ok(decoded) = bs58::decode(address).into_vec() else {
        return false;
    };
    if decoded.len() <= 1 + CHECKSUM_LENGTH {
        return false;
    }
    let (payload, embedded) = decoded.split_at(decoded.len() - CHECKSUM_LENGTH);
    checksum(payload) == embedded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_is_valid() {
        let wallet = Wallet::new().unwrap();
        assert!(validate_address(&wallet.address()));
    }

    #[test]
    fn test_address_embeds_pubkey_hash() {
        let wallet = Wallet::new().unwrap();
        let embedded = pubkey_hash_from_address(&wallet.address()).unwrap();
        assert_eq!(embedded, hash_pubkey(wallet.public_key()));
    }

    #[test]
    fn test_address_roundtrip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.address();

        // Decodificar e recodificar reproduz a mesma string
        let decoded = bs58::decode(&address).into_vec().unwrap();
        assert_eq!(decoded.len(), 25);
        assert_eq!(decoded[0], ADDRESS_VERSION);
        assert_eq!(bs58::encode(decoded).into_string(), address);
    }

    #[test]
    fn test_corrupted_address_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut address = wallet.address().into_bytes();

        // Troca um caractere por outro do alfabeto base58
        let position = address.len() / 2;
        address[position] = if address[position] == b'2' { b'3' } else { b'2' };
        let corrupted = String::from_utf8(address).unwrap();

        assert!(!validate_address(&corrupted));
    }

    #[test]
    fn test_garbage_addresses_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OlI"));
        assert!(!validate_address("abc"));
    }

    #[test]
    fn test_wallet_signs_after_reload() {
        let wallet = Wallet::new().unwrap();
        let copy: Wallet = serde_json::from_str(&serde_json::to_string(&wallet).unwrap()).unwrap();

        assert_eq!(wallet.address(), copy.address());

        let signature = copy.sign(b"mensagem").unwrap();
        assert!(crate::crypto::verify_signature(
            wallet.public_key(),
            b"mensagem",
            &signature
        ));
    }
}
