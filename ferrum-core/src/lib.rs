pub mod block;
pub mod chain;
pub mod mempool;
pub mod merkle;
pub mod proof;
pub mod transaction;
pub mod utxo;

// Re-exports principais
pub use block::Block;
pub use chain::{Blockchain, ChainIterator};
pub use mempool::Mempool;
pub use merkle::{MerkleNode, MerkleTree};
pub use proof::{ProofOfWork, DIFFICULTY};
pub use transaction::{Transaction, TxInput, TxOutput, SUBSIDY};
pub use utxo::{StoredOutputs, UtxoSet};

// Re-exports de tipos compartilhados
pub use shared::{LedgerError, Result};
