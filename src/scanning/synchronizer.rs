//! Drives subscriptions from node blocks and pool differences
//!
//! A round is split in three steps so callers can release their locks while
//! waiting on the node:
//!
//! 1. `begin_*` snapshots what the node needs (sparse chain, known pool, keys)
//! 2. `fetch_*` talks to the node and scans transactions with the view keys
//! 3. `apply_*` feeds the results to the subscriptions in height order
//!
//! [`TransfersSynchronizer::synchronize`] runs complete rounds for callers that
//! own the synchronizer outright.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, info};

use crate::{
    data_structures::{
        account::AccountPublicAddress,
        transaction::Transaction,
        types::{Hash, UNCONFIRMED_TRANSACTION_HEIGHT},
    },
    errors::{WalletError, WalletResult},
    scanning::{
        node::{Node, NodeError, NodeResult},
        output_scanner::{find_owned_output_indices, scan_transaction, ScanKeys},
        subscription::{SynchronizationStart, TransfersSubscription},
    },
    storage::stored_output::{TransactionBlockInfo, TransactionOutputInformationIn},
};

/// Number of most recent blocks listed one by one in the sparse chain
const SPARSE_CHAIN_DENSE_PART: usize = 10;

/// Local chain and pool knowledge, saved with the wallet
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SynchronizerState {
    pub blockchain: Vec<Hash>,
    pub known_pool: Vec<Hash>,
}

#[derive(Debug, Clone)]
pub struct BlocksRequest {
    pub sparse_chain: Vec<Hash>,
    pub timestamp: u64,
    pub accounts: Vec<(ScanKeys, SynchronizationStart)>,
}

#[derive(Debug, Clone)]
pub struct PoolRequest {
    pub known_pool: Vec<Hash>,
    pub tip: Hash,
    pub accounts: Vec<ScanKeys>,
}

/// A transaction with the outputs each account owns in it
#[derive(Debug, Clone)]
pub struct ScannedTransaction {
    pub transaction: Transaction,
    pub owned: BTreeMap<AccountPublicAddress, Vec<TransactionOutputInformationIn>>,
}

#[derive(Debug, Clone)]
pub struct ScannedBlock {
    pub hash: Hash,
    pub timestamp: u64,
    /// Coinbase first
    pub transactions: Vec<ScannedTransaction>,
}

#[derive(Debug, Clone)]
pub struct FetchedBlocks {
    pub start_height: u32,
    pub blocks: Vec<ScannedBlock>,
    pub node_height: u32,
}

#[derive(Debug, Clone)]
pub struct FetchedPool {
    pub is_blockchain_actual: bool,
    pub added: Vec<ScannedTransaction>,
    pub deleted: Vec<Hash>,
}

/// Outcome of applying one batch of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocksApplied {
    pub new_blocks: usize,
    pub detached_at: Option<u32>,
    pub local_block_count: u32,
    /// Height of the node's tip
    pub node_height: u32,
}

pub struct TransfersSynchronizer {
    state: SynchronizerState,
    subscriptions: BTreeMap<AccountPublicAddress, TransfersSubscription>,
}

impl Default for TransfersSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransfersSynchronizer {
    pub fn new() -> Self {
        Self::from_state(SynchronizerState::default())
    }

    pub fn from_state(state: SynchronizerState) -> Self {
        Self {
            state,
            subscriptions: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &SynchronizerState {
        &self.state
    }

    pub fn add_subscription(&mut self, subscription: TransfersSubscription) {
        self.subscriptions.insert(*subscription.address(), subscription);
    }

    pub fn subscription(&self, address: &AccountPublicAddress) -> Option<&TransfersSubscription> {
        self.subscriptions.get(address)
    }

    pub fn subscription_mut(
        &mut self,
        address: &AccountPublicAddress,
    ) -> Option<&mut TransfersSubscription> {
        self.subscriptions.get_mut(address)
    }

    /// Number of blocks in the local chain
    pub fn local_block_count(&self) -> u32 {
        self.state.blockchain.len() as u32
    }

    pub fn tip(&self) -> Hash {
        self.state.blockchain.last().copied().unwrap_or_default()
    }

    /// Recent hashes one by one, then exponentially sparser, always ending with genesis
    pub fn sparse_chain(&self) -> Vec<Hash> {
        let chain = &self.state.blockchain;
        let mut sparse = Vec::new();
        if chain.is_empty() {
            return sparse;
        }
        let top = chain.len() - 1;
        let mut offset = 0usize;
        let mut step = 1usize;
        while offset <= top {
            sparse.push(chain[top - offset]);
            if sparse.len() >= SPARSE_CHAIN_DENSE_PART {
                step = step.saturating_mul(2);
            }
            offset = offset.saturating_add(step);
        }
        if sparse.last() != chain.first() {
            sparse.push(chain[0]);
        }
        sparse
    }

    pub fn begin_blocks(&self) -> BlocksRequest {
        let accounts: Vec<(ScanKeys, SynchronizationStart)> = self
            .subscriptions
            .values()
            .map(|s| (s.keys().clone(), s.sync_start()))
            .collect();
        let timestamp = accounts
            .iter()
            .map(|(_, start)| start.timestamp)
            .min()
            .unwrap_or(0);
        BlocksRequest {
            sparse_chain: self.sparse_chain(),
            timestamp,
            accounts,
        }
    }

    pub fn begin_pool(&self) -> PoolRequest {
        PoolRequest {
            known_pool: self.state.known_pool.clone(),
            tip: self.tip(),
            accounts: self.subscriptions.values().map(|s| s.keys().clone()).collect(),
        }
    }

    /// Apply fetched blocks. A block whose hash differs from the local chain
    /// detaches every subscription at its height first.
    pub fn apply_blocks(&mut self, fetched: FetchedBlocks) -> WalletResult<BlocksApplied> {
        let mut applied = BlocksApplied {
            new_blocks: 0,
            detached_at: None,
            local_block_count: 0,
            node_height: fetched.node_height,
        };
        for (offset, block) in fetched.blocks.into_iter().enumerate() {
            let height = fetched.start_height + offset as u32;
            let index = height as usize;
            if index < self.state.blockchain.len() {
                if self.state.blockchain[index] == block.hash {
                    continue;
                }
                self.detach(height);
                applied.detached_at = Some(height);
            }
            if index != self.state.blockchain.len() {
                return Err(WalletError::InternalError(format!(
                    "node returned block {height} but local chain has {} blocks",
                    self.state.blockchain.len()
                )));
            }
            self.state.blockchain.push(block.hash);
            self.apply_block(height, block);
            applied.new_blocks += 1;
        }
        applied.local_block_count = self.local_block_count();
        if applied.new_blocks > 0 {
            debug!(
                new_blocks = applied.new_blocks,
                blocks = applied.local_block_count,
                "applied block batch"
            );
        }
        Ok(applied)
    }

    fn apply_block(&mut self, height: u32, block: ScannedBlock) {
        for subscription in self.subscriptions.values_mut() {
            if subscription.is_block_relevant(height, block.timestamp) {
                for (index, scanned) in block.transactions.iter().enumerate() {
                    let info = TransactionBlockInfo {
                        height,
                        timestamp: block.timestamp,
                        transaction_index: index as u32,
                    };
                    let outputs = scanned
                        .owned
                        .get(subscription.address())
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    subscription.add_transaction(&info, &scanned.transaction, outputs);
                }
            }
            subscription.advance_height(height);
        }
    }

    fn detach(&mut self, height: u32) {
        info!(height, "blockchain reorganization detected");
        self.state.blockchain.truncate(height as usize);
        for subscription in self.subscriptions.values_mut() {
            subscription.on_blockchain_detach(height);
        }
    }

    pub fn apply_pool(&mut self, fetched: FetchedPool) {
        if !fetched.is_blockchain_actual {
            debug!("pool difference skipped, local chain is behind the node");
            return;
        }
        let mut known: BTreeSet<Hash> = self.state.known_pool.iter().copied().collect();
        for hash in &fetched.deleted {
            known.remove(hash);
            for subscription in self.subscriptions.values_mut() {
                subscription.delete_unconfirmed_transaction(hash);
            }
        }
        let block = TransactionBlockInfo::unconfirmed();
        for scanned in &fetched.added {
            known.insert(scanned.transaction.hash());
            for subscription in self.subscriptions.values_mut() {
                let outputs = scanned
                    .owned
                    .get(subscription.address())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                subscription.add_transaction(&block, &scanned.transaction, outputs);
            }
        }
        self.state.known_pool = known.into_iter().collect();
    }

    /// Report a node failure to every subscription at the first height not applied yet
    pub fn on_error(&mut self, error: &NodeError) {
        let height = self.local_block_count();
        for subscription in self.subscriptions.values_mut() {
            subscription.on_error(error, height);
        }
    }

    /// Report a failed pool round. Confirmed data stays untouched.
    pub fn on_pool_error(&mut self, error: &NodeError) {
        for subscription in self.subscriptions.values_mut() {
            subscription.on_error(error, UNCONFIRMED_TRANSACTION_HEIGHT);
        }
    }

    /// Run block rounds until the node has nothing new, then one pool round
    pub async fn synchronize(
        &mut self,
        node: &dyn Node,
        progress: &mut (dyn FnMut(u32, u32) + Send),
    ) -> WalletResult<()> {
        loop {
            let request = self.begin_blocks();
            let fetched = match fetch_blocks(node, &request).await {
                Ok(fetched) => fetched,
                Err(error) => {
                    self.on_error(&error);
                    return Err(error.into());
                }
            };
            let applied = self.apply_blocks(fetched)?;
            progress(applied.local_block_count, applied.node_height + 1);
            if applied.new_blocks == 0 {
                break;
            }
        }
        let request = self.begin_pool();
        match fetch_pool(node, &request).await {
            Ok(fetched) => {
                self.apply_pool(fetched);
                Ok(())
            }
            Err(error) => {
                self.on_pool_error(&error);
                Err(error.into())
            }
        }
    }
}

async fn scan_confirmed(
    node: &dyn Node,
    transaction: Transaction,
    accounts: &[&ScanKeys],
) -> NodeResult<ScannedTransaction> {
    let interested: Vec<&ScanKeys> = accounts
        .iter()
        .copied()
        .filter(|keys| {
            !find_owned_output_indices(&transaction, &keys.address, &keys.view_secret_key)
                .is_empty()
        })
        .collect();
    let mut owned = BTreeMap::new();
    if !interested.is_empty() {
        let global_indices = node
            .get_transaction_outs_global_indices(&transaction.hash())
            .await?;
        for keys in interested {
            owned.insert(
                keys.address,
                scan_transaction(&transaction, keys, Some(&global_indices)),
            );
        }
    }
    Ok(ScannedTransaction { transaction, owned })
}

/// Query blocks following the request's sparse chain and scan them
pub async fn fetch_blocks(node: &dyn Node, request: &BlocksRequest) -> NodeResult<FetchedBlocks> {
    let result = node
        .query_blocks(&request.sparse_chain, request.timestamp)
        .await?;
    let node_height = node.get_last_local_block_height().await?;

    let mut blocks = Vec::with_capacity(result.blocks.len());
    for (offset, block) in result.blocks.into_iter().enumerate() {
        let height = result.start_height + offset as u32;
        let accounts: Vec<&ScanKeys> = request
            .accounts
            .iter()
            .filter(|(_, start)| height >= start.height && block.timestamp >= start.timestamp)
            .map(|(keys, _)| keys)
            .collect();
        let mut transactions = Vec::with_capacity(block.transactions.len() + 1);
        transactions.push(scan_confirmed(node, block.base_transaction, &accounts).await?);
        for transaction in block.transactions {
            transactions.push(scan_confirmed(node, transaction, &accounts).await?);
        }
        blocks.push(ScannedBlock {
            hash: block.hash,
            timestamp: block.timestamp,
            transactions,
        });
    }
    Ok(FetchedBlocks {
        start_height: result.start_height,
        blocks,
        node_height,
    })
}

pub async fn fetch_pool(node: &dyn Node, request: &PoolRequest) -> NodeResult<FetchedPool> {
    let difference = node
        .get_pool_symmetric_difference(&request.known_pool, request.tip)
        .await?;
    let added = difference
        .added
        .into_iter()
        .map(|transaction| {
            let owned = request
                .accounts
                .iter()
                .map(|keys| (keys.address, scan_transaction(&transaction, keys, None)))
                .filter(|(_, outputs)| !outputs.is_empty())
                .collect();
            ScannedTransaction { transaction, owned }
        })
        .collect();
    Ok(FetchedPool {
        is_blockchain_actual: difference.is_blockchain_actual,
        added,
        deleted: difference.deleted,
    })
}
