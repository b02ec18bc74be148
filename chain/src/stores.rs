//! Persistence seams for prefetched headers and transactions.
//!
//! Durable storage (SQLite indexing and friends) is an external
//! collaborator; these traits state the contract the composite client relies
//! on, and the in-memory implementations back tests and cold starts.

use async_trait::async_trait;
use dashmap::DashMap;

use ar_gateway_types::json::{BlockJson, TransactionJson};
use ar_gateway_types::{Base64, H384};

#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn get_by_height(&self, height: u64) -> Option<BlockJson>;
    async fn get_by_hash(&self, hash: &H384) -> Option<BlockJson>;
    /// Stores by hash always; additionally keys by height only when the
    /// block is deep enough to be reorg-safe.
    async fn put(&self, block: &BlockJson, stable: bool);
    /// Removes both the hash and height entries for a block.
    async fn delete(&self, block: &BlockJson);
}

#[async_trait]
pub trait TxStore: Send + Sync {
    async fn get(&self, id: &Base64) -> Option<TransactionJson>;
    async fn put(&self, tx: &TransactionJson);
}

#[derive(Default)]
pub struct MemoryBlockStore {
    by_hash: DashMap<H384, BlockJson>,
    by_height: DashMap<u64, BlockJson>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn get_by_height(&self, height: u64) -> Option<BlockJson> {
        self.by_height.get(&height).map(|block| block.clone())
    }

    async fn get_by_hash(&self, hash: &H384) -> Option<BlockJson> {
        self.by_hash.get(hash).map(|block| block.clone())
    }

    async fn put(&self, block: &BlockJson, stable: bool) {
        self.by_hash.insert(block.indep_hash, block.clone());
        if stable {
            self.by_height.insert(block.height, block.clone());
        }
    }

    async fn delete(&self, block: &BlockJson) {
        self.by_hash.remove(&block.indep_hash);
        self.by_height.remove(&block.height);
    }
}

#[derive(Default)]
pub struct MemoryTxStore {
    txs: DashMap<Vec<u8>, TransactionJson>,
}

impl MemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }
}

#[async_trait]
impl TxStore for MemoryTxStore {
    async fn get(&self, id: &Base64) -> Option<TransactionJson> {
        self.txs.get(&id.0).map(|tx| tx.clone())
    }

    async fn put(&self, tx: &TransactionJson) {
        self.txs.insert(tx.id.0.clone(), tx.clone());
    }
}
