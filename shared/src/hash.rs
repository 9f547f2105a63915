use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Comprimento do checksum embutido nos endereços
pub const CHECKSUM_LENGTH: usize = 4;

/// SHA-256 dos dados fornecidos
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// SHA-256 aplicado duas vezes
#[must_use]
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Checksum de endereço: primeiros 4 bytes do double-SHA-256
#[must_use]
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256(payload)[..CHECKSUM_LENGTH].to_vec()
}

/// Hash de chave pública: ripemd160(sha256(pubkey)), 20 bytes
#[must_use]
pub fn hash_pubkey(pubkey: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(pubkey);
    Ripemd160::digest(sha.as_slice()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // sha256("abc"), vetor público do FIPS 180-2
        let hash = sha256(b"abc");
        assert_eq!(
            hex::encode(hash),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_double_sha256_differs_from_single() {
        let data = b"ferrum";
        assert_ne!(sha256(data), double_sha256(data));
        assert_eq!(double_sha256(data), sha256(&sha256(data)));
    }

    #[test]
    fn test_checksum_length() {
        assert_eq!(checksum(b"payload qualquer").len(), CHECKSUM_LENGTH);
    }

    #[test]
    fn test_hash_pubkey_is_twenty_bytes() {
        let pubkey = vec![0xABu8; 64];
        let hash = hash_pubkey(&pubkey);
        assert_eq!(hash.len(), 20);

        // Determinístico
        assert_eq!(hash, hash_pubkey(&pubkey));
    }
}
