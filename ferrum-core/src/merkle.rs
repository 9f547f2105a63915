//! Árvore de Merkle sobre as serializações das transações de um bloco.

use shared::{sha256, LedgerError, Result};

/// Nó da árvore: folhas carregam sha256(item), nós internos
/// carregam sha256(esquerda ‖ direita)
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    pub data: Vec<u8>,
}

impl MerkleNode {
    fn leaf(item: &[u8]) -> Self {
        Self {
            left: None,
            right: None,
            data: sha256(item),
        }
    }

    fn parent(left: MerkleNode, right: MerkleNode) -> Self {
        let mut combined = left.data.clone();
        combined.extend_from_slice(&right.data);
        Self {
            data: sha256(&combined),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }
}

/// Árvore binária reconstruída a cada uso; a raiz é o compromisso do bloco
/// com o seu conjunto de transações
#[derive(Debug, Clone)]
pub struct MerkleTree {
    pub root: MerkleNode,
}

impl MerkleTree {
    /// Constrói a árvore. Níveis com contagem ímpar duplicam o último
    /// elemento antes do pareamento.
    ///
    /// # Errors
    ///
    /// Retorna erro se a lista de itens estiver vazia
    pub fn new(items: &[Vec<u8>]) -> Result<Self> {
        if items.is_empty() {
            return Err(LedgerError::InvalidTransaction(
                "bloco sem transações não tem raiz de Merkle".to_string(),
            ));
        }

        let mut nodes: Vec<MerkleNode> = items.iter().map(|item| MerkleNode::leaf(item)).collect();
        if nodes.len() % 2 != 0 {
            let last = nodes[nodes.len() - 1].clone();
            nodes.push(last);
        }

        while nodes.len() > 1 {
            if nodes.len() % 2 != 0 {
                let last = nodes[nodes.len() - 1].clone();
                nodes.push(last);
            }

            let mut level = Vec::with_capacity(nodes.len() / 2);
            let mut pairs = nodes.into_iter();
            while let (Some(left), Some(right)) = (pairs.next(), pairs.next()) {
                level.push(MerkleNode::parent(left, right));
            }
            nodes = level;
        }

        let root = nodes
            .pop()
            .ok_or_else(|| LedgerError::InvalidTransaction("árvore de Merkle vazia".to_string()))?;
        Ok(Self { root })
    }

    /// Hash da raiz da árvore
    #[must_use]
    pub fn root_hash(&self) -> &[u8] {
        &self.root.data
    }
}
