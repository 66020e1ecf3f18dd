//! In-memory node for deterministic testing
//!
//! Keeps a chain of blocks, a transaction pool and a per-amount index of
//! confirmed outputs. Relayed transactions are checked (key images, ring
//! members, ring signatures) before they enter the pool. Failure modes let
//! tests make the next call of a given kind fail.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use rand::seq::index::sample;

use crate::{
    common::{decompose_amount_into_digits, unix_time_now, Currency},
    crypto,
    data_structures::{
        account::AccountPublicAddress,
        extra::add_transaction_public_key_to_extra,
        transaction::{
            relative_output_offsets_to_absolute, Transaction, TransactionInput, TransactionOutput,
            TransactionOutputTarget, TransactionPrefix, CURRENT_TRANSACTION_VERSION,
        },
        types::{Amount, Hash, KeyImage, PublicKey},
    },
    scanning::node::{
        BlockDetails, Node, NodeError, NodeResult, PoolDifference, QueryBlocksResult,
        RandomOutEntry, RandomOutsForAmount,
    },
};

const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct MockFailureModes {
    /// Fail next relay_transaction call
    pub fail_relay: bool,
    /// Fail next query_blocks call
    pub fail_query_blocks: bool,
    /// Fail next get_random_outs_by_amounts call
    pub fail_random_outs: bool,
    /// Fail next pool difference call
    pub fail_pool: bool,
    /// Return specific error message for next failing operation
    pub next_error_message: Option<String>,
}

/// Calls seen by the node, for assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCallCounts {
    pub query_blocks: usize,
    pub pool_difference: usize,
    pub random_outs: usize,
    pub global_indices: usize,
    pub relay: usize,
}

#[derive(Debug)]
struct NodeState {
    currency: Currency,
    blocks: Vec<BlockDetails>,
    pool: Vec<Transaction>,
    outputs_by_amount: BTreeMap<Amount, Vec<PublicKey>>,
    global_indices: HashMap<Hash, Vec<u32>>,
    spent_key_images: BTreeSet<KeyImage>,
    minimal_fee: Amount,
    batch_size: usize,
    relay_delay: Option<Duration>,
    failure_modes: MockFailureModes,
    calls: NodeCallCounts,
    nonce: u64,
}

#[derive(Debug, Clone)]
pub struct InMemoryNode {
    state: Arc<Mutex<NodeState>>,
}

impl Default for InMemoryNode {
    fn default() -> Self {
        Self::new(Currency::default())
    }
}

impl InMemoryNode {
    /// Create a node holding only a genesis block
    pub fn new(currency: Currency) -> Self {
        let minimal_fee = currency.minimum_fee;
        let node = Self {
            state: Arc::new(Mutex::new(NodeState {
                currency,
                blocks: Vec::new(),
                pool: Vec::new(),
                outputs_by_amount: BTreeMap::new(),
                global_indices: HashMap::new(),
                spent_key_images: BTreeSet::new(),
                minimal_fee,
                batch_size: DEFAULT_BATCH_SIZE,
                relay_delay: None,
                failure_modes: MockFailureModes::default(),
                calls: NodeCallCounts::default(),
                nonce: 0,
            })),
        };
        node.mine_block(None, 0);
        node
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.lock().batch_size = batch_size.max(1);
    }

    pub fn set_relay_delay(&self, delay: Duration) {
        self.lock().relay_delay = Some(delay);
    }

    pub fn set_failure_mode(&self, mode: MockFailureModes) {
        self.lock().failure_modes = mode;
    }

    pub fn calls(&self) -> NodeCallCounts {
        self.lock().calls.clone()
    }

    pub fn height(&self) -> u32 {
        self.lock().blocks.len() as u32 - 1
    }

    pub fn pool(&self) -> Vec<Transaction> {
        self.lock().pool.clone()
    }

    pub fn block_hash(&self, height: u32) -> Option<Hash> {
        self.lock().blocks.get(height as usize).map(|b| b.hash)
    }

    /// Mine a block with every pool transaction. The coinbase pays `reward`
    /// to `miner` split into digit amounts.
    pub fn mine_block(&self, miner: Option<&AccountPublicAddress>, reward: Amount) -> Hash {
        let mut state = self.lock();
        let height = state.blocks.len() as u32;
        let base_transaction = coinbase(&state.currency, height, miner, reward);
        let transactions = std::mem::take(&mut state.pool);
        state.push_block(base_transaction, transactions)
    }

    pub fn mine_empty_blocks(&self, count: u32) {
        for _ in 0..count {
            self.mine_block(None, 0);
        }
    }

    /// Drop the top `depth` blocks. Their ordinary transactions go back to the pool.
    pub fn pop_blocks(&self, depth: u32) {
        let mut state = self.lock();
        for _ in 0..depth {
            if state.blocks.len() <= 1 {
                break;
            }
            state.pop_block();
        }
    }

    /// Replace the top `depth` blocks with `depth + 1` new empty-reward blocks
    pub fn reorganize(&self, depth: u32) {
        self.pop_blocks(depth);
        for _ in 0..=depth {
            self.mine_block(None, 0);
        }
    }

    fn check_failure(state: &mut NodeState, operation: &str) -> NodeResult<()> {
        let modes = &mut state.failure_modes;
        let failing = match operation {
            "relay" => std::mem::take(&mut modes.fail_relay),
            "query_blocks" => std::mem::take(&mut modes.fail_query_blocks),
            "random_outs" => std::mem::take(&mut modes.fail_random_outs),
            "pool" => std::mem::take(&mut modes.fail_pool),
            _ => false,
        };
        if !failing {
            return Ok(());
        }
        let message = modes
            .next_error_message
            .take()
            .unwrap_or_else(|| format!("Mock failure: {operation}"));
        Err(NodeError::NetworkError(message))
    }
}

impl NodeState {
    fn push_block(&mut self, base_transaction: Transaction, transactions: Vec<Transaction>) -> Hash {
        let height = self.blocks.len() as u32;
        let previous = self.blocks.last().map(|b| b.hash).unwrap_or_default();
        self.nonce += 1;

        let mut data = Vec::new();
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(previous.as_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(base_transaction.hash().as_bytes());
        for tx in &transactions {
            data.extend_from_slice(tx.hash().as_bytes());
        }
        let hash = crypto::fast_hash(&data);

        self.index_transaction(&base_transaction);
        for tx in &transactions {
            self.index_transaction(tx);
        }
        self.blocks.push(BlockDetails {
            hash,
            timestamp: unix_time_now(),
            base_transaction,
            transactions,
        });
        hash
    }

    fn index_transaction(&mut self, tx: &Transaction) {
        let mut indices = Vec::with_capacity(tx.prefix.outputs.len());
        for output in &tx.prefix.outputs {
            let key = match &output.target {
                TransactionOutputTarget::Key { key } => *key,
                TransactionOutputTarget::Multisignature { keys, .. } => {
                    keys.first().copied().unwrap_or_default()
                }
            };
            let outputs = self.outputs_by_amount.entry(output.amount).or_default();
            indices.push(outputs.len() as u32);
            outputs.push(key);
        }
        for input in &tx.prefix.inputs {
            if let TransactionInput::Key { key_image, .. } = input {
                self.spent_key_images.insert(*key_image);
            }
        }
        self.global_indices.insert(tx.hash(), indices);
    }

    fn unindex_transaction(&mut self, tx: &Transaction) {
        for output in tx.prefix.outputs.iter().rev() {
            if let Some(outputs) = self.outputs_by_amount.get_mut(&output.amount) {
                outputs.pop();
            }
        }
        for input in &tx.prefix.inputs {
            if let TransactionInput::Key { key_image, .. } = input {
                self.spent_key_images.remove(key_image);
            }
        }
        self.global_indices.remove(&tx.hash());
    }

    fn pop_block(&mut self) {
        let Some(block) = self.blocks.pop() else {
            return;
        };
        for tx in block.transactions.iter().rev() {
            self.unindex_transaction(tx);
        }
        self.unindex_transaction(&block.base_transaction);
        let mut returned = block.transactions;
        returned.append(&mut self.pool);
        self.pool = returned;
    }

    fn validate(&self, tx: &Transaction) -> Result<(), String> {
        if tx.prefix.inputs.len() != tx.signatures.len() {
            return Err("signature count does not match input count".to_string());
        }
        let mut pool_images = BTreeSet::new();
        for pooled in &self.pool {
            for input in &pooled.prefix.inputs {
                if let TransactionInput::Key { key_image, .. } = input {
                    pool_images.insert(*key_image);
                }
            }
        }
        let prefix_hash = tx.prefix_hash();
        for (input, signatures) in tx.prefix.inputs.iter().zip(&tx.signatures) {
            let TransactionInput::Key {
                amount,
                output_indexes,
                key_image,
            } = input
            else {
                return Err("only key inputs can be relayed".to_string());
            };
            if self.spent_key_images.contains(key_image) || pool_images.contains(key_image) {
                return Err(format!("key image {key_image} already spent"));
            }
            let outputs = self.outputs_by_amount.get(amount).map(Vec::as_slice).unwrap_or(&[]);
            let ring: Option<Vec<PublicKey>> = relative_output_offsets_to_absolute(output_indexes)
                .into_iter()
                .map(|index| outputs.get(index as usize).copied())
                .collect();
            let Some(ring) = ring else {
                return Err(format!("unknown ring member for amount {amount}"));
            };
            if !crypto::check_ring_signature(&prefix_hash, key_image, &ring, signatures) {
                return Err("invalid ring signature".to_string());
            }
        }
        if tx.inputs_amount() < tx.outputs_amount() {
            return Err("outputs exceed inputs".to_string());
        }
        Ok(())
    }
}

fn coinbase(
    currency: &Currency,
    height: u32,
    miner: Option<&AccountPublicAddress>,
    reward: Amount,
) -> Transaction {
    let mut rng = rand::thread_rng();
    let tx_key = crypto::generate_keys(&mut rng);
    let mut extra = Vec::new();
    add_transaction_public_key_to_extra(&mut extra, &tx_key.public_key);

    let mut outputs = Vec::new();
    if let Some(miner) = miner {
        if let Some(derivation) =
            crypto::generate_key_derivation(&miner.view_public_key, &tx_key.secret_key)
        {
            let (mut amounts, dust) = decompose_amount_into_digits(reward, 0);
            if dust > 0 {
                amounts.push(dust);
            }
            for amount in amounts {
                let index = outputs.len();
                if let Some(key) = crypto::derive_public_key(&derivation, index, &miner.spend_public_key) {
                    outputs.push(TransactionOutput {
                        amount,
                        target: TransactionOutputTarget::Key { key },
                    });
                }
            }
        }
    }
    Transaction {
        prefix: TransactionPrefix {
            version: CURRENT_TRANSACTION_VERSION,
            unlock_time: u64::from(height) + u64::from(currency.mined_money_unlock_window),
            inputs: vec![TransactionInput::Base {
                block_index: height,
            }],
            outputs,
            extra,
        },
        signatures: vec![],
    }
}

#[async_trait]
impl Node for InMemoryNode {
    async fn get_last_local_block_height(&self) -> NodeResult<u32> {
        Ok(self.height())
    }

    async fn get_minimal_fee(&self) -> NodeResult<Amount> {
        Ok(self.lock().minimal_fee)
    }

    async fn query_blocks(
        &self,
        sparse_chain: &[Hash],
        _timestamp: u64,
    ) -> NodeResult<QueryBlocksResult> {
        let mut state = self.lock();
        state.calls.query_blocks += 1;
        Self::check_failure(&mut state, "query_blocks")?;

        let start = sparse_chain
            .iter()
            .find_map(|hash| state.blocks.iter().position(|b| b.hash == *hash))
            .unwrap_or(0);
        let end = (start + state.batch_size).min(state.blocks.len());
        Ok(QueryBlocksResult {
            start_height: start as u32,
            blocks: state.blocks[start..end].to_vec(),
        })
    }

    async fn get_pool_symmetric_difference(
        &self,
        known_pool_transactions: &[Hash],
        known_block_id: Hash,
    ) -> NodeResult<PoolDifference> {
        let mut state = self.lock();
        state.calls.pool_difference += 1;
        Self::check_failure(&mut state, "pool")?;

        let is_blockchain_actual = state.blocks.last().map(|b| b.hash) == Some(known_block_id);
        let pool_hashes: BTreeSet<Hash> = state.pool.iter().map(Transaction::hash).collect();
        let known: BTreeSet<Hash> = known_pool_transactions.iter().copied().collect();
        Ok(PoolDifference {
            is_blockchain_actual,
            added: state
                .pool
                .iter()
                .filter(|tx| !known.contains(&tx.hash()))
                .cloned()
                .collect(),
            deleted: known.difference(&pool_hashes).copied().collect(),
        })
    }

    async fn get_random_outs_by_amounts(
        &self,
        amounts: &[Amount],
        outs_count: u64,
    ) -> NodeResult<Vec<RandomOutsForAmount>> {
        let mut state = self.lock();
        state.calls.random_outs += 1;
        Self::check_failure(&mut state, "random_outs")?;

        let mut rng = rand::thread_rng();
        let result = amounts
            .iter()
            .map(|amount| {
                let outputs = state.outputs_by_amount.get(amount).map(Vec::as_slice).unwrap_or(&[]);
                let count = (outs_count as usize).min(outputs.len());
                let outs = sample(&mut rng, outputs.len(), count)
                    .into_iter()
                    .map(|index| RandomOutEntry {
                        global_amount_index: index as u32,
                        out_key: outputs[index],
                    })
                    .collect();
                RandomOutsForAmount {
                    amount: *amount,
                    outs,
                }
            })
            .collect();
        Ok(result)
    }

    async fn get_transaction_outs_global_indices(&self, hash: &Hash) -> NodeResult<Vec<u32>> {
        let mut state = self.lock();
        state.calls.global_indices += 1;
        state
            .global_indices
            .get(hash)
            .cloned()
            .ok_or(NodeError::TransactionNotFound(*hash))
    }

    async fn relay_transaction(&self, tx: &Transaction) -> NodeResult<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.relay += 1;
            state.relay_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        Self::check_failure(&mut state, "relay")?;
        state
            .validate(tx)
            .map_err(NodeError::TransactionRejected)?;
        state.pool.push(tx.clone());
        Ok(())
    }
}
