//! Sends the container has not observed yet
//!
//! Until a sent transaction shows up in the pool or a block, its inputs are
//! still unspent in the container and its change does not exist there. This
//! registry keeps both so balances and input selection stay correct.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    data_structures::types::{Amount, Hash},
    storage::stored_output::{OutputReference, TransactionOutputInformation},
    wallet::types::TransactionId,
};

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnconfirmedTransferDetails {
    pub hash: Hash,
    pub sent_time: u64,
    /// Change returning to the account
    pub change: Amount,
    /// Sum of the consumed outputs
    pub outs_amount: Amount,
    pub used_outputs: Vec<OutputReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WalletUnconfirmedTransactions {
    transactions: BTreeMap<TransactionId, UnconfirmedTransferDetails>,
}

impl WalletUnconfirmedTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        id: TransactionId,
        hash: Hash,
        change: Amount,
        used_outputs: &[TransactionOutputInformation],
        sent_time: u64,
    ) {
        self.transactions.insert(
            id,
            UnconfirmedTransferDetails {
                hash,
                sent_time,
                change,
                outs_amount: used_outputs.iter().map(|o| o.amount).sum(),
                used_outputs: used_outputs.iter().map(|o| o.reference()).collect(),
            },
        );
    }

    pub fn find_transaction_id(&self, hash: &Hash) -> Option<TransactionId> {
        self.transactions
            .iter()
            .find(|(_, details)| details.hash == *hash)
            .map(|(id, _)| *id)
    }

    pub fn erase(&mut self, id: TransactionId) -> Option<UnconfirmedTransferDetails> {
        self.transactions.remove(&id)
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.transactions.contains_key(&id)
    }

    pub fn is_used(&self, output: &OutputReference) -> bool {
        self.transactions
            .values()
            .any(|details| details.used_outputs.contains(output))
    }

    pub fn used_outputs(&self) -> BTreeSet<OutputReference> {
        self.transactions
            .values()
            .flat_map(|details| details.used_outputs.iter().copied())
            .collect()
    }

    pub fn count_unconfirmed_outs_amount(&self) -> Amount {
        self.transactions.values().map(|d| d.outs_amount).sum()
    }

    pub fn count_unconfirmed_transactions_amount(&self) -> Amount {
        self.transactions.values().map(|d| d.change).sum()
    }

    /// Remove and return entries sent before `now - live_time`
    pub fn take_outdated(&mut self, now: u64, live_time: u64) -> Vec<TransactionId> {
        let outdated: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|(_, details)| details.sent_time.saturating_add(live_time) < now)
            .map(|(id, _)| *id)
            .collect();
        for id in &outdated {
            self.transactions.remove(id);
        }
        outdated
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn reset(&mut self) {
        self.transactions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_structures::types::PublicKey, storage::stored_output::OutputPayload};

    fn output(seed: u8, amount: Amount) -> TransactionOutputInformation {
        TransactionOutputInformation {
            payload: OutputPayload::Key {
                output_key: PublicKey::default(),
            },
            amount,
            global_output_index: 0,
            output_in_transaction: 0,
            transaction_hash: Hash::new([seed; 32]),
            transaction_public_key: PublicKey::default(),
        }
    }

    #[test]
    fn amounts_and_used_outputs() {
        let mut registry = WalletUnconfirmedTransactions::new();
        let first = output(1, 700);
        let second = output(2, 300);
        registry.add(0, Hash::new([9; 32]), 90, &[first.clone(), second.clone()], 100);
        registry.add(1, Hash::new([8; 32]), 5, &[output(3, 50)], 200);

        assert_eq!(registry.count_unconfirmed_outs_amount(), 1050);
        assert_eq!(registry.count_unconfirmed_transactions_amount(), 95);
        assert!(registry.is_used(&first.reference()));
        assert_eq!(registry.used_outputs().len(), 3);
        assert_eq!(registry.find_transaction_id(&Hash::new([8; 32])), Some(1));

        registry.erase(0);
        assert!(!registry.is_used(&second.reference()));
        assert_eq!(registry.count_unconfirmed_outs_amount(), 50);
    }

    #[test]
    fn outdated_entries_are_removed() {
        let mut registry = WalletUnconfirmedTransactions::new();
        registry.add(0, Hash::new([1; 32]), 0, &[], 100);
        registry.add(1, Hash::new([2; 32]), 0, &[], 500);

        assert_eq!(registry.take_outdated(400, 200), vec![0]);
        assert_eq!(registry.len(), 1);
        assert!(registry.take_outdated(600, 200).is_empty());
        assert!(registry.contains(1));
    }
}
