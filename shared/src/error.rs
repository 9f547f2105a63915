use thiserror::Error;

/// Erros do ledger e do nó Ferrum
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Bloco ou transação não encontrado")]
    NotFound,

    #[error("Endereço inválido: {0}")]
    InvalidAddress(String),

    #[error("Transação inválida: {0}")]
    InvalidTransaction(String),

    #[error("Fundos insuficientes: necessário {needed}, disponível {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Erro de armazenamento: {0}")]
    Store(String),

    #[error("Armazenamento em uso por outro processo")]
    StoreLocked,

    #[error("Espaço de nonce esgotado durante a mineração")]
    PowFailure,

    #[error("Já existe uma blockchain para este nó")]
    ChainExists,

    #[error("Nenhuma blockchain encontrada; crie uma com createblockchain")]
    ChainNotFound,

    #[error("Erro criptográfico: {0}")]
    Crypto(String),

    #[error("Erro de serialização: {0}")]
    Serialization(String),

    #[error("Erro de rede: {0}")]
    Network(String),

    #[error("Configuração inválida: {0}")]
    Config(String),
}
