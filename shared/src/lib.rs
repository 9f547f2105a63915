pub mod crypto;
pub mod error;
pub mod hash;
pub mod wallet;

pub use crypto::{verify_signature, KeyPair, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
pub use error::LedgerError;
pub use hash::{checksum, double_sha256, hash_pubkey, sha256, CHECKSUM_LENGTH};
pub use wallet::{
    address_from_pubkey_hash, pubkey_hash_from_address, validate_address, Wallet, ADDRESS_VERSION,
};

pub type Result<T> = std::result::Result<T, LedgerError>;
