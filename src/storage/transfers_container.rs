//! Per-account index of owned outputs
//!
//! Every owned output lives in exactly one of three sets:
//!
//! - `unconfirmed`: outputs of transactions only seen in the pool
//! - `available`: confirmed outputs that have not been spent
//! - `spent`: outputs consumed by a known (confirmed or pool) transaction
//!
//! Lock state is never stored. It is derived at query time from the current
//! height, the wall clock and the owning transaction's unlock time.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{
    common::{unix_time_now, Currency},
    data_structures::{
        transaction::{Transaction, TransactionInput},
        types::{
            Amount, Hash, KeyImage, UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
            UNCONFIRMED_TRANSACTION_HEIGHT,
        },
    },
    storage::{
        output_status::{OutputState, OutputType, TransferFlags},
        stored_output::{
            OutputReference, TransactionBlockInfo, TransactionInformation,
            TransactionOutputInformation, TransactionOutputInformationIn,
            TransactionSpentOutputInformation,
        },
    },
};

/// Unlock rules the container needs from the currency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerParameters {
    pub transaction_spendable_age: u32,
    pub mined_money_unlock_window: u32,
    pub locked_tx_allowed_delta_blocks: u64,
    pub locked_tx_allowed_delta_seconds: u64,
    pub max_block_number: u64,
}

impl ContainerParameters {
    pub fn from_currency(currency: &Currency) -> Self {
        Self {
            transaction_spendable_age: currency.transaction_spendable_age,
            mined_money_unlock_window: currency.mined_money_unlock_window,
            locked_tx_allowed_delta_blocks: currency.locked_tx_allowed_delta_blocks,
            locked_tx_allowed_delta_seconds: currency.locked_tx_allowed_delta_seconds,
            max_block_number: currency.max_block_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct OutputRecord {
    output: TransactionOutputInformation,
    key_image: Option<KeyImage>,
    block_height: u32,
    unlock_time: u64,
    is_coinbase: bool,
}

impl OutputRecord {
    fn id(&self) -> OutputReference {
        self.output.reference()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct SpentOutputRecord {
    record: OutputRecord,
    spending_block: TransactionBlockInfo,
    spending_transaction_hash: Hash,
    input_in_transaction: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct TransactionRecord {
    info: TransactionInformation,
    transaction_index: u32,
    seen_in_pool: bool,
}

/// Serializable container contents
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransfersContainerState {
    transactions: BTreeMap<Hash, TransactionRecord>,
    unconfirmed: BTreeMap<OutputReference, OutputRecord>,
    available: BTreeMap<OutputReference, OutputRecord>,
    spent: BTreeMap<OutputReference, SpentOutputRecord>,
    current_height: u32,
}

/// Hashes affected by a detach
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachResult {
    /// Transactions no longer tracked
    pub deleted: Vec<Hash>,
    /// Pool-seen transactions moved back to the unconfirmed state
    pub demoted: Vec<Hash>,
}

#[derive(Debug, Clone)]
pub struct TransfersContainer {
    params: ContainerParameters,
    state: TransfersContainerState,
}

impl TransfersContainer {
    pub fn new(params: ContainerParameters) -> Self {
        Self {
            params,
            state: TransfersContainerState::default(),
        }
    }

    pub fn from_state(params: ContainerParameters, state: TransfersContainerState) -> Self {
        Self { params, state }
    }

    pub fn state(&self) -> &TransfersContainerState {
        &self.state
    }

    pub fn current_height(&self) -> u32 {
        self.state.current_height
    }

    /// Record a transaction and the outputs of it owned by the account.
    ///
    /// Returns whether the container changed. Re-delivering a known hash at the
    /// same height is a no-op. Re-delivering a pool transaction inside a block
    /// confirms it.
    ///
    /// # Panics
    /// If an owned output does not belong to `tx`, or its global index does not
    /// agree with the block (sentinel iff unconfirmed).
    pub fn add_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        owned_outputs: &[TransactionOutputInformationIn],
    ) -> bool {
        let hash = tx.hash();
        self.check_owned_outputs(block, tx, &hash, owned_outputs);

        if let Some(existing) = self.state.transactions.get(&hash) {
            let known_height = existing.info.block_height;
            if known_height == block.height {
                return false;
            }
            if known_height == UNCONFIRMED_TRANSACTION_HEIGHT {
                let mut global_indices = vec![0u32; tx.prefix.outputs.len()];
                for owned in owned_outputs {
                    global_indices[owned.info.output_in_transaction as usize] =
                        owned.info.global_output_index;
                }
                return self.mark_transaction_confirmed(block, &hash, &global_indices);
            }
            if !block.is_unconfirmed() {
                warn!(
                    transaction = %hash,
                    known_height,
                    height = block.height,
                    "transaction already confirmed at another height"
                );
            }
            return false;
        }

        let spent_any = self.add_transaction_inputs(block, tx, &hash);
        let is_coinbase = tx.is_coinbase();
        for owned in owned_outputs {
            let record = OutputRecord {
                output: owned.info.clone(),
                key_image: owned.key_image,
                block_height: block.height,
                unlock_time: tx.prefix.unlock_time,
                is_coinbase,
            };
            if let Some(spent) = self.state.spent.get_mut(&record.id()) {
                // re-added after a detach while its spender stayed tracked
                spent.record = record;
            } else if block.is_unconfirmed() {
                self.state.unconfirmed.insert(record.id(), record);
            } else {
                self.state.available.insert(record.id(), record);
            }
        }

        if !spent_any && owned_outputs.is_empty() {
            return false;
        }

        let mut info = TransactionInformation {
            transaction_hash: hash,
            public_key: tx.public_key().unwrap_or_default(),
            block_height: block.height,
            timestamp: block.timestamp,
            unlock_time: tx.prefix.unlock_time,
            total_amount_in: tx.inputs_amount(),
            total_amount_out: tx.outputs_amount(),
            extra: tx.prefix.extra.clone(),
            payment_id: None,
        };
        info.refresh_payment_id();
        self.state.transactions.insert(
            hash,
            TransactionRecord {
                info,
                transaction_index: block.transaction_index,
                seen_in_pool: block.is_unconfirmed(),
            },
        );
        debug!(
            transaction = %hash,
            height = block.height,
            outputs = owned_outputs.len(),
            "transaction added to container"
        );
        true
    }

    fn check_owned_outputs(
        &self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        hash: &Hash,
        owned_outputs: &[TransactionOutputInformationIn],
    ) {
        for owned in owned_outputs {
            let info = &owned.info;
            assert_eq!(
                info.transaction_hash, *hash,
                "owned output refers to another transaction"
            );
            let output = tx
                .prefix
                .outputs
                .get(info.output_in_transaction as usize)
                .unwrap_or_else(|| {
                    panic!(
                        "owned output index {} out of range for transaction {hash}",
                        info.output_in_transaction
                    )
                });
            assert_eq!(output.amount, info.amount, "owned output amount mismatch");
            assert_eq!(
                block.is_unconfirmed(),
                !info.is_confirmed(),
                "global output index does not match the block state"
            );
        }
    }

    fn add_transaction_inputs(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        hash: &Hash,
    ) -> bool {
        let mut spent_any = false;
        for (input_index, input) in tx.prefix.inputs.iter().enumerate() {
            let found = match input {
                TransactionInput::Key {
                    amount, key_image, ..
                } => self.find_available(|record| {
                    record.key_image.as_ref() == Some(key_image) && record.output.amount == *amount
                }),
                TransactionInput::Multisignature {
                    amount,
                    output_index,
                    ..
                } => self.find_available(|record| {
                    record.output.output_type() == OutputType::Multisignature
                        && record.output.amount == *amount
                        && record.output.global_output_index == *output_index
                }),
                TransactionInput::Base { .. } => None,
            };
            let Some(id) = found else {
                continue;
            };
            if let Some(record) = self.state.available.remove(&id) {
                self.state.spent.insert(
                    id,
                    SpentOutputRecord {
                        record,
                        spending_block: *block,
                        spending_transaction_hash: *hash,
                        input_in_transaction: input_index as u32,
                    },
                );
                spent_any = true;
            }
        }
        spent_any
    }

    fn find_available<F>(&self, predicate: F) -> Option<OutputReference>
    where F: Fn(&OutputRecord) -> bool {
        self.state
            .available
            .iter()
            .find(|(_, record)| predicate(record))
            .map(|(id, _)| *id)
    }

    /// Promote a pool transaction into a block. `global_indices` is indexed by
    /// output position in the transaction.
    pub fn mark_transaction_confirmed(
        &mut self,
        block: &TransactionBlockInfo,
        hash: &Hash,
        global_indices: &[u32],
    ) -> bool {
        assert!(
            !block.is_unconfirmed(),
            "cannot confirm a transaction into the unconfirmed block"
        );
        let Some(transaction) = self.state.transactions.get_mut(hash) else {
            return false;
        };
        if transaction.info.is_confirmed() {
            return false;
        }
        transaction.info.block_height = block.height;
        transaction.info.timestamp = block.timestamp;
        transaction.transaction_index = block.transaction_index;

        let ids: Vec<OutputReference> = self
            .state
            .unconfirmed
            .keys()
            .filter(|id| id.transaction_hash == *hash)
            .copied()
            .collect();
        for id in ids {
            if let Some(mut record) = self.state.unconfirmed.remove(&id) {
                let index = global_indices
                    .get(id.output_in_transaction as usize)
                    .copied()
                    .unwrap_or_else(|| {
                        panic!("missing global index for output {}", id.output_in_transaction)
                    });
                record.output.global_output_index = index;
                record.block_height = block.height;
                self.state.available.insert(id, record);
            }
        }
        for spent in self.state.spent.values_mut() {
            if spent.spending_transaction_hash == *hash {
                spent.spending_block = *block;
            }
        }
        debug!(transaction = %hash, height = block.height, "transaction confirmed");
        true
    }

    /// Forget a transaction only ever seen in the pool, restoring the outputs it spent
    pub fn delete_unconfirmed_transaction(&mut self, hash: &Hash) -> bool {
        match self.state.transactions.get(hash) {
            Some(transaction) if !transaction.info.is_confirmed() => {}
            _ => return false,
        }
        self.remove_transaction(hash);
        true
    }

    fn remove_transaction(&mut self, hash: &Hash) {
        self.state.transactions.remove(hash);
        self.state.unconfirmed.retain(|id, _| id.transaction_hash != *hash);
        self.state.available.retain(|id, _| id.transaction_hash != *hash);
        // a spend by a still tracked transaction outlives its source
        let transactions = &self.state.transactions;
        self.state.spent.retain(|id, spent| {
            id.transaction_hash != *hash
                || transactions.contains_key(&spent.spending_transaction_hash)
        });

        let restored: Vec<OutputReference> = self
            .state
            .spent
            .iter()
            .filter(|(_, spent)| spent.spending_transaction_hash == *hash)
            .map(|(id, _)| *id)
            .collect();
        for id in restored {
            if let Some(spent) = self.state.spent.remove(&id) {
                if !self.state.transactions.contains_key(&id.transaction_hash) {
                    continue;
                }
                let record = spent.record;
                if record.block_height == UNCONFIRMED_TRANSACTION_HEIGHT {
                    self.state.unconfirmed.insert(id, record);
                } else {
                    self.state.available.insert(id, record);
                }
            }
        }
    }

    /// Undo every transaction confirmed at `height` or above.
    ///
    /// Transactions that were seen in the pool go back to the unconfirmed state,
    /// the others are removed and the outputs they spent become available again.
    pub fn detach(&mut self, height: u32) -> DetachResult {
        let mut affected: Vec<(u32, u32, Hash)> = self
            .state
            .transactions
            .iter()
            .filter(|(_, t)| t.info.is_confirmed() && t.info.block_height >= height)
            .map(|(hash, t)| (t.info.block_height, t.transaction_index, *hash))
            .collect();
        // newest first so spends are undone before the outputs they consume
        affected.sort_unstable_by(|a, b| b.cmp(a));

        let mut result = DetachResult::default();
        for (_, _, hash) in affected {
            let seen_in_pool = self
                .state
                .transactions
                .get(&hash)
                .map(|t| t.seen_in_pool)
                .unwrap_or(false);
            if seen_in_pool {
                self.demote_transaction(&hash);
                result.demoted.push(hash);
            } else {
                self.remove_transaction(&hash);
                result.deleted.push(hash);
            }
        }
        self.state.current_height = self.state.current_height.min(height.saturating_sub(1));
        debug!(
            height,
            deleted = result.deleted.len(),
            demoted = result.demoted.len(),
            "container detached"
        );
        result
    }

    fn demote_transaction(&mut self, hash: &Hash) {
        let unconfirmed = TransactionBlockInfo::unconfirmed();
        if let Some(transaction) = self.state.transactions.get_mut(hash) {
            transaction.info.block_height = unconfirmed.height;
            transaction.info.timestamp = unconfirmed.timestamp;
            transaction.transaction_index = unconfirmed.transaction_index;
        }
        let ids: Vec<OutputReference> = self
            .state
            .available
            .keys()
            .filter(|id| id.transaction_hash == *hash)
            .copied()
            .collect();
        for id in ids {
            if let Some(mut record) = self.state.available.remove(&id) {
                record.output.global_output_index = UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX;
                record.block_height = UNCONFIRMED_TRANSACTION_HEIGHT;
                self.state.unconfirmed.insert(id, record);
            }
        }
        for (id, spent) in self.state.spent.iter_mut() {
            if id.transaction_hash == *hash {
                spent.record.output.global_output_index =
                    UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX;
                spent.record.block_height = UNCONFIRMED_TRANSACTION_HEIGHT;
            }
            if spent.spending_transaction_hash == *hash {
                spent.spending_block = unconfirmed;
            }
        }
    }

    /// Move the current height forward. Returns false, leaving the height
    /// unchanged, if `height` is below it.
    pub fn advance_height(&mut self, height: u32) -> bool {
        if height < self.state.current_height {
            return false;
        }
        self.state.current_height = height;
        true
    }

    fn is_spend_time_unlocked(&self, unlock_time: u64) -> bool {
        if unlock_time < self.params.max_block_number {
            u64::from(self.state.current_height) + self.params.locked_tx_allowed_delta_blocks
                >= unlock_time
        } else {
            unix_time_now() + self.params.locked_tx_allowed_delta_seconds >= unlock_time
        }
    }

    fn output_state(&self, record: &OutputRecord) -> OutputState {
        if !self.is_spend_time_unlocked(record.unlock_time) {
            return OutputState::Locked;
        }
        if record.block_height == UNCONFIRMED_TRANSACTION_HEIGHT {
            return OutputState::SoftLocked;
        }
        let window = if record.is_coinbase {
            self.params
                .mined_money_unlock_window
                .max(self.params.transaction_spendable_age)
        } else {
            self.params.transaction_spendable_age
        };
        if u64::from(self.state.current_height) < u64::from(record.block_height) + u64::from(window)
        {
            return OutputState::SoftLocked;
        }
        OutputState::Unlocked
    }

    fn unspent_records(&self) -> impl Iterator<Item = &OutputRecord> {
        self.state
            .unconfirmed
            .values()
            .chain(self.state.available.values())
    }

    fn matching_outputs<'a>(
        &'a self,
        flags: TransferFlags,
    ) -> impl Iterator<Item = &'a TransactionOutputInformation> + 'a {
        let unspent = self
            .unspent_records()
            .filter(move |record| flags.matches(record.output.output_type(), self.output_state(record)))
            .map(|record| &record.output);
        let spent = self
            .state
            .spent
            .values()
            .filter(move |spent| flags.matches(spent.record.output.output_type(), OutputState::Spent))
            .map(|spent| &spent.record.output);
        unspent.chain(spent)
    }

    pub fn balance(&self, flags: TransferFlags) -> Amount {
        self.matching_outputs(flags)
            .fold(0u64, |sum, output| sum.saturating_add(output.amount))
    }

    pub fn get_outputs(&self, flags: TransferFlags) -> Vec<TransactionOutputInformation> {
        self.matching_outputs(flags).cloned().collect()
    }

    pub fn get_transaction_outputs(
        &self,
        hash: &Hash,
        flags: TransferFlags,
    ) -> Vec<TransactionOutputInformation> {
        self.matching_outputs(flags)
            .filter(|output| output.transaction_hash == *hash)
            .cloned()
            .collect()
    }

    /// Owned outputs spent by the transaction. Only the type bits of `flags` are used.
    pub fn get_transaction_inputs(
        &self,
        hash: &Hash,
        flags: TransferFlags,
    ) -> Vec<TransactionOutputInformation> {
        self.state
            .spent
            .values()
            .filter(|spent| {
                spent.spending_transaction_hash == *hash
                    && flags.intersects(spent.record.output.output_type().flag())
            })
            .map(|spent| spent.record.output.clone())
            .collect()
    }

    pub fn get_spent_outputs(&self) -> Vec<TransactionSpentOutputInformation> {
        self.state
            .spent
            .values()
            .map(|spent| TransactionSpentOutputInformation {
                output: spent.record.output.clone(),
                key_image: spent.record.key_image,
                spending_block: spent.spending_block,
                spending_transaction_hash: spent.spending_transaction_hash,
                input_in_transaction: spent.input_in_transaction,
            })
            .collect()
    }

    /// Transaction metadata with the amounts it moved in and out of the account
    pub fn get_transaction_information(
        &self,
        hash: &Hash,
    ) -> Option<(TransactionInformation, Amount, Amount)> {
        let transaction = self.state.transactions.get(hash)?;
        let amount_in = self
            .state
            .spent
            .values()
            .filter(|spent| spent.spending_transaction_hash == *hash)
            .fold(0u64, |sum, spent| sum.saturating_add(spent.record.output.amount));
        let amount_out = self
            .get_transaction_outputs(hash, TransferFlags::INCLUDE_ALL)
            .iter()
            .fold(0u64, |sum, output| sum.saturating_add(output.amount));
        Some((transaction.info.clone(), amount_in, amount_out))
    }

    pub fn is_tracked(&self, hash: &Hash) -> bool {
        self.state.transactions.contains_key(hash)
    }

    pub fn transactions_count(&self) -> usize {
        self.state.transactions.len()
    }

    pub fn get_transactions_hashes(&self) -> Vec<Hash> {
        self.state.transactions.keys().copied().collect()
    }

    pub fn get_unconfirmed_transactions(&self) -> Vec<Hash> {
        self.state
            .transactions
            .iter()
            .filter(|(_, t)| !t.info.is_confirmed())
            .map(|(hash, _)| *hash)
            .collect()
    }
}
