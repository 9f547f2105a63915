//! Assinaturas ECDSA sobre a curva P-256.
//!
//! As coordenadas de assinatura e de chave pública são serializadas sempre
//! com 32 bytes em big-endian, de modo que a divisão dos buffers acontece no
//! byte 32 e nunca depende do comprimento observado.

use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair as _, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use zeroize::Zeroize;

use crate::error::LedgerError;
use crate::Result;

/// Tamanho da assinatura r‖s, 32 bytes por escalar
pub const SIGNATURE_LENGTH: usize = 64;

/// Tamanho da chave pública X‖Y, 32 bytes por coordenada
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// Prefixo SEC1 de ponto não comprimido, removido do formato de carteira
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// Par de chaves P-256 de uma carteira
pub struct KeyPair {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl KeyPair {
    /// Gera um par de chaves novo
    ///
    /// # Errors
    ///
    /// Retorna erro se o gerador de números aleatórios do sistema falhar
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| LedgerError::Crypto(e.to_string()))?;
        Self::from_pkcs8(document.as_ref().to_vec())
    }

    /// Reconstrói o par a partir do documento PKCS#8 persistido
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não formarem uma chave P-256 válida
    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Self> {
        let key_pair = parse_key_pair(&pkcs8)?;
        // X‖Y com 32 bytes por coordenada; o tag SEC1 fica de fora
        let public_key = key_pair.public_key().as_ref()[1..].to_vec();
        Ok(Self { pkcs8, public_key })
    }

    /// Chave pública no formato X‖Y
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Documento PKCS#8 com a chave privada
    #[must_use]
    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Assina uma mensagem; retorna r‖s com largura fixa
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração do nonce da assinatura falhar
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let key_pair = parse_key_pair(&self.pkcs8)?;
        let signature = key_pair
            .sign(&rng, message)
            .map_err(|e| LedgerError::Crypto(e.to_string()))?;
        Ok(signature.as_ref().to_vec())
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.pkcs8.zeroize();
    }
}

fn parse_key_pair(pkcs8: &[u8]) -> Result<EcdsaKeyPair> {
    let rng = SystemRandom::new();
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| LedgerError::Crypto(e.to_string()))
}

/// Verifica uma assinatura r‖s contra a chave pública X‖Y
#[must_use]
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if public_key.len() != PUBLIC_KEY_LENGTH || signature.len() != SIGNATURE_LENGTH {
        return false;
    }

    let mut sec1 = Vec::with_capacity(PUBLIC_KEY_LENGTH + 1);
    sec1.push(SEC1_UNCOMPRESSED_TAG);
    sec1.extend_from_slice(public_key);

    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, sec1)
        .verify(message, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation_sizes() {
        let pair = KeyPair::generate().unwrap();
        assert_eq!(pair.public_key().len(), PUBLIC_KEY_LENGTH);
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::generate().unwrap();
        let message = b"transferencia de 20 tokens";

        let signature = pair.sign(message).unwrap();
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        assert!(verify_signature(pair.public_key(), message, &signature));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let pair = KeyPair::generate().unwrap();
        let message = b"mensagem original";

        let mut signature = pair.sign(message).unwrap();
        signature[10] ^= 0x01;
        assert!(!verify_signature(pair.public_key(), message, &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let message = b"mensagem";

        let signature = alice.sign(message).unwrap();
        assert!(!verify_signature(bob.public_key(), message, &signature));
    }

    #[test]
    fn test_roundtrip_through_pkcs8() {
        let pair = KeyPair::generate().unwrap();
        let restored = KeyPair::from_pkcs8(pair.pkcs8().to_vec()).unwrap();

        assert_eq!(pair.public_key(), restored.public_key());

        let message = b"assinado pela copia";
        let signature = restored.sign(message).unwrap();
        assert!(verify_signature(pair.public_key(), message, &signature));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let pair = KeyPair::generate().unwrap();
        let signature = pair.sign(b"m").unwrap();

        // Tamanhos errados nunca passam da checagem de largura fixa
        assert!(!verify_signature(&pair.public_key()[..32], b"m", &signature));
        assert!(!verify_signature(pair.public_key(), b"m", &signature[..63]));
    }
}
