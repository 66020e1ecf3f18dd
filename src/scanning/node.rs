//! Interface to the node the wallet synchronizes with and relays through

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_structures::{
    transaction::Transaction,
    types::{Amount, Hash, PublicKey},
};

/// Errors reported by the node layer. The wallet forwards them unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node is not initialized")]
    NotInitialized,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Transaction rejected by node: {0}")]
    TransactionRejected(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(Hash),

    #[error("Node internal error: {0}")]
    InternalError(String),
}

pub type NodeResult<T> = Result<T, NodeError>;

/// One block as delivered to the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDetails {
    pub hash: Hash,
    pub timestamp: u64,
    pub base_transaction: Transaction,
    pub transactions: Vec<Transaction>,
}

/// Answer to a block query. `blocks[0]` is at `start_height` and is the last
/// block shared with the sparse chain sent by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBlocksResult {
    pub start_height: u32,
    pub blocks: Vec<BlockDetails>,
}

/// Changes of the transaction pool relative to the hashes the caller knows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDifference {
    /// False when the caller's tip is not the node's tip
    pub is_blockchain_actual: bool,
    pub added: Vec<Transaction>,
    pub deleted: Vec<Hash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOutEntry {
    pub global_amount_index: u32,
    pub out_key: PublicKey,
}

/// Decoy candidates for one amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOutsForAmount {
    pub amount: Amount,
    pub outs: Vec<RandomOutEntry>,
}

#[async_trait]
pub trait Node: Send + Sync {
    async fn get_last_local_block_height(&self) -> NodeResult<u32>;

    async fn get_minimal_fee(&self) -> NodeResult<Amount>;

    /// Blocks following the last hash of `sparse_chain` known to the node.
    /// Blocks older than `timestamp` may be returned without transactions.
    async fn query_blocks(
        &self,
        sparse_chain: &[Hash],
        timestamp: u64,
    ) -> NodeResult<QueryBlocksResult>;

    async fn get_pool_symmetric_difference(
        &self,
        known_pool_transactions: &[Hash],
        known_block_id: Hash,
    ) -> NodeResult<PoolDifference>;

    async fn get_random_outs_by_amounts(
        &self,
        amounts: &[Amount],
        outs_count: u64,
    ) -> NodeResult<Vec<RandomOutsForAmount>>;

    async fn get_transaction_outs_global_indices(&self, hash: &Hash) -> NodeResult<Vec<u32>>;

    async fn relay_transaction(&self, tx: &Transaction) -> NodeResult<()>;
}
