//! Flat transaction and transfer lists shown to wallet users
//!
//! Transactions and transfers live in two append-only arenas. A transaction
//! owns the contiguous transfer range `first_transfer_id..first_transfer_id +
//! transfer_count`, so ids handed out once stay valid for the life of the
//! cache.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::debug;

use crate::{
    data_structures::{
        extra::get_payment_id_from_extra,
        transaction::Transaction,
        types::{Amount, Hash, SecretKey, UNCONFIRMED_TRANSACTION_HEIGHT},
    },
    errors::{WalletError, WalletResult},
    storage::stored_output::{OutputReference, TransactionInformation, TransactionOutputInformation},
    wallet::{
        types::{
            PaymentIdTransactions, TransactionId, TransferId, WalletLegacyTransaction,
            WalletLegacyTransactionState, WalletLegacyTransfer,
        },
        unconfirmed_transactions::WalletUnconfirmedTransactions,
    },
};

/// Persistent part of the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionsCacheState {
    pub transactions: Vec<WalletLegacyTransaction>,
    pub transfers: Vec<WalletLegacyTransfer>,
    pub unconfirmed: WalletUnconfirmedTransactions,
    /// Transactions moved back to the pool by a reorganization, with the time it happened
    pub orphaned: BTreeMap<TransactionId, u64>,
}

#[derive(Debug, Clone)]
pub struct WalletUserTransactionsCache {
    state: TransactionsCacheState,
    payment_ids: BTreeMap<Hash, Vec<TransactionId>>,
    unconfirmed_live_time: u64,
    orphaned_grace_period: u64,
}

impl WalletUserTransactionsCache {
    /// Timeouts are in seconds
    pub fn new(unconfirmed_live_time: u64, orphaned_grace_period: u64) -> Self {
        Self::from_state(
            TransactionsCacheState::default(),
            unconfirmed_live_time,
            orphaned_grace_period,
        )
    }

    pub fn from_state(
        state: TransactionsCacheState,
        unconfirmed_live_time: u64,
        orphaned_grace_period: u64,
    ) -> Self {
        let mut cache = Self {
            state,
            payment_ids: BTreeMap::new(),
            unconfirmed_live_time,
            orphaned_grace_period,
        };
        for id in 0..cache.state.transactions.len() {
            cache.index_payment_id(id);
        }
        cache
    }

    pub fn state(&self) -> &TransactionsCacheState {
        &self.state
    }

    /// Record a send being prepared. Returns the new transaction id.
    pub fn add_new_transaction(
        &mut self,
        amount: Amount,
        fee: Amount,
        extra: &[u8],
        transfers: &[WalletLegacyTransfer],
        unlock_time: u64,
        sent_time: u64,
    ) -> TransactionId {
        let first_transfer_id = self.state.transfers.len();
        self.state.transfers.extend_from_slice(transfers);
        let transaction = WalletLegacyTransaction {
            first_transfer_id,
            transfer_count: transfers.len(),
            total_amount: -(amount as i64),
            fee,
            sent_time,
            unlock_time,
            extra: extra.to_vec(),
            state: WalletLegacyTransactionState::Sending,
            ..WalletLegacyTransaction::default()
        };
        self.insert_transaction(transaction)
    }

    /// Attach the signed transaction to a send and reserve the outputs it consumes
    pub fn update_transaction(
        &mut self,
        id: TransactionId,
        tx: &Transaction,
        change_amount: Amount,
        used_outputs: &[TransactionOutputInformation],
        tx_key: SecretKey,
    ) -> WalletResult<()> {
        let transaction = self
            .state
            .transactions
            .get_mut(id)
            .ok_or_else(|| WalletError::InvalidArgument(format!("unknown transaction id {id}")))?;
        let hash = tx.hash();
        transaction.hash = hash;
        transaction.secret_key = Some(tx_key);
        transaction.extra = tx.prefix.extra.clone();
        let sent_time = transaction.sent_time;
        self.state
            .unconfirmed
            .add(id, hash, change_amount, used_outputs, sent_time);
        Ok(())
    }

    /// Apply the relay outcome. Returns false without changes unless the
    /// transaction is still `Sending`.
    pub fn update_transaction_sending_state(
        &mut self,
        id: TransactionId,
        result: &WalletResult<()>,
    ) -> bool {
        let Some(transaction) = self.state.transactions.get_mut(id) else {
            return false;
        };
        if transaction.state != WalletLegacyTransactionState::Sending {
            return false;
        }
        transaction.state = match result {
            Ok(()) => WalletLegacyTransactionState::Active,
            Err(WalletError::TxCancelled) => WalletLegacyTransactionState::Cancelled,
            Err(_) => WalletLegacyTransactionState::Failed,
        };
        // a cancelled signed send keeps its reservation until observed or expired
        match result {
            Ok(()) | Err(WalletError::TxCancelled) => {}
            Err(_) => {
                self.state.unconfirmed.erase(id);
            }
        }
        debug!(id, state = ?transaction.state, "send state updated");
        true
    }

    /// Reconcile a transaction the container reported. Returns its id and
    /// whether a new record was created.
    pub fn on_transaction_updated(
        &mut self,
        info: &TransactionInformation,
        balance_delta: i64,
        now: u64,
    ) -> Option<(TransactionId, bool)> {
        let known = self
            .state
            .unconfirmed
            .find_transaction_id(&info.transaction_hash)
            .or_else(|| self.find_transaction_by_hash(&info.transaction_hash));

        let Some(id) = known else {
            let is_coinbase = info.total_amount_in == 0;
            let transaction = WalletLegacyTransaction {
                total_amount: balance_delta,
                fee: if is_coinbase {
                    0
                } else {
                    info.total_amount_in.saturating_sub(info.total_amount_out)
                },
                unlock_time: info.unlock_time,
                hash: info.transaction_hash,
                is_coinbase,
                block_height: info.block_height,
                timestamp: info.timestamp,
                extra: info.extra.clone(),
                state: WalletLegacyTransactionState::Active,
                ..WalletLegacyTransaction::default()
            };
            return Some((self.insert_transaction(transaction), true));
        };

        self.state.unconfirmed.erase(id);
        let transaction = &mut self.state.transactions[id];
        let was_confirmed = transaction.is_confirmed();
        transaction.block_height = info.block_height;
        transaction.timestamp = info.timestamp;
        if transaction.state == WalletLegacyTransactionState::Deleted {
            transaction.state = WalletLegacyTransactionState::Active;
        }
        if info.is_confirmed() {
            self.state.orphaned.remove(&id);
        } else if was_confirmed {
            self.state.orphaned.insert(id, now);
        }
        Some((id, false))
    }

    /// Soft-delete a transaction the container dropped
    pub fn on_transaction_deleted(&mut self, hash: &Hash) -> Option<TransactionId> {
        let id = self.find_transaction_by_hash(hash)?;
        self.state.orphaned.remove(&id);
        let transaction = &mut self.state.transactions[id];
        if transaction.state != WalletLegacyTransactionState::Active {
            return None;
        }
        transaction.state = WalletLegacyTransactionState::Deleted;
        transaction.block_height = UNCONFIRMED_TRANSACTION_HEIGHT;
        Some(id)
    }

    /// Expire sends never seen on the network and orphans that never came back.
    /// Returns the ids whose state changed.
    pub fn delete_outdated_transactions(&mut self, now: u64) -> Vec<TransactionId> {
        let mut changed = BTreeSet::new();
        let live_time = self.unconfirmed_live_time;

        for id in self.state.unconfirmed.take_outdated(now, live_time) {
            let transaction = &mut self.state.transactions[id];
            transaction.state = match transaction.state {
                WalletLegacyTransactionState::Sending => WalletLegacyTransactionState::Failed,
                WalletLegacyTransactionState::Active => WalletLegacyTransactionState::Deleted,
                other => other,
            };
            changed.insert(id);
        }
        for (id, transaction) in self.state.transactions.iter_mut().enumerate() {
            if transaction.state == WalletLegacyTransactionState::Sending
                && transaction.sent_time.saturating_add(live_time) < now
            {
                transaction.state = WalletLegacyTransactionState::Failed;
                changed.insert(id);
            }
        }

        let grace_period = self.orphaned_grace_period;
        let expired: Vec<TransactionId> = self
            .state
            .orphaned
            .iter()
            .filter(|(_, since)| since.saturating_add(grace_period) < now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.state.orphaned.remove(&id);
            let transaction = &mut self.state.transactions[id];
            if transaction.state == WalletLegacyTransactionState::Active
                && !transaction.is_confirmed()
            {
                transaction.state = WalletLegacyTransactionState::Deleted;
                changed.insert(id);
            }
        }

        if !changed.is_empty() {
            debug!(count = changed.len(), "outdated transactions removed");
        }
        changed.into_iter().collect()
    }

    /// Confirmed incoming transactions grouped by payment id, in request order
    pub fn get_transactions_by_payment_ids(&self, payment_ids: &[Hash]) -> Vec<PaymentIdTransactions> {
        payment_ids
            .iter()
            .map(|payment_id| PaymentIdTransactions {
                payment_id: *payment_id,
                transactions: self
                    .payment_ids
                    .get(payment_id)
                    .into_iter()
                    .flatten()
                    .map(|id| &self.state.transactions[*id])
                    .filter(|tx| {
                        tx.is_confirmed() && tx.state == WalletLegacyTransactionState::Active
                    })
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    pub fn get_transaction(&self, id: TransactionId) -> Option<&WalletLegacyTransaction> {
        self.state.transactions.get(id)
    }

    pub fn get_transfer(&self, id: TransferId) -> Option<&WalletLegacyTransfer> {
        self.state.transfers.get(id)
    }

    pub fn find_transaction_by_transfer_id(&self, transfer_id: TransferId) -> Option<TransactionId> {
        self.state
            .transactions
            .iter()
            .position(|tx| tx.transfer_range().contains(&transfer_id))
    }

    pub fn find_transaction_by_hash(&self, hash: &Hash) -> Option<TransactionId> {
        self.state
            .transactions
            .iter()
            .rposition(|tx| tx.hash == *hash && !tx.state.is_terminal())
    }

    pub fn transaction_count(&self) -> usize {
        self.state.transactions.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.state.transfers.len()
    }

    pub fn unconfirmed_outs_amount(&self) -> Amount {
        self.state.unconfirmed.count_unconfirmed_outs_amount()
    }

    pub fn unconfirmed_transactions_amount(&self) -> Amount {
        self.state.unconfirmed.count_unconfirmed_transactions_amount()
    }

    pub fn is_used(&self, output: &OutputReference) -> bool {
        self.state.unconfirmed.is_used(output)
    }

    pub fn used_outputs(&self) -> BTreeSet<OutputReference> {
        self.state.unconfirmed.used_outputs()
    }

    pub fn reset(&mut self) {
        self.state = TransactionsCacheState::default();
        self.payment_ids.clear();
    }

    fn insert_transaction(&mut self, transaction: WalletLegacyTransaction) -> TransactionId {
        let id = self.state.transactions.len();
        self.state.transactions.push(transaction);
        self.index_payment_id(id);
        id
    }

    fn index_payment_id(&mut self, id: TransactionId) {
        let transaction = &self.state.transactions[id];
        if transaction.total_amount <= 0 {
            return;
        }
        if let Some(payment_id) = get_payment_id_from_extra(&transaction.extra) {
            self.payment_ids.entry(payment_id).or_default().push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{
        extra::create_tx_extra_with_payment_id,
        transaction::TransactionPrefix,
        types::PublicKey,
    };

    const LIVE_TIME: u64 = 100;
    const GRACE_PERIOD: u64 = 1000;

    fn cache() -> WalletUserTransactionsCache {
        WalletUserTransactionsCache::new(LIVE_TIME, GRACE_PERIOD)
    }

    fn info(seed: u8, height: u32, extra: Vec<u8>) -> TransactionInformation {
        TransactionInformation {
            transaction_hash: Hash::new([seed; 32]),
            public_key: PublicKey::default(),
            block_height: height,
            timestamp: 50,
            unlock_time: 0,
            total_amount_in: 0,
            total_amount_out: 500,
            extra,
            payment_id: None,
        }
    }

    fn state_of(cache: &WalletUserTransactionsCache, id: TransactionId) -> WalletLegacyTransactionState {
        cache.get_transaction(id).unwrap().state
    }

    fn transfers(count: usize) -> Vec<WalletLegacyTransfer> {
        (0..count)
            .map(|i| WalletLegacyTransfer::new(format!("addr{i}"), 10 * (i as i64 + 1)))
            .collect()
    }

    fn signed(seed: u8) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![],
                outputs: vec![],
                extra: vec![seed],
            },
            signatures: vec![],
        }
    }

    fn output(seed: u8, amount: Amount) -> TransactionOutputInformation {
        TransactionOutputInformation {
            payload: crate::storage::stored_output::OutputPayload::Key {
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
    fn transfer_ranges_stay_contiguous_and_disjoint() {
        let mut cache = cache();
        for round in 0..6u8 {
            cache.add_new_transaction(100, 10, &[], &transfers(round as usize % 3 + 1), 0, 0);
            cache.on_transaction_updated(&info(round + 100, 5, vec![]), 500, 0);
        }

        let mut covered = vec![false; cache.transfer_count()];
        for id in 0..cache.transaction_count() {
            let transaction = cache.get_transaction(id).unwrap();
            let range = transaction.transfer_range();
            assert!(range.end <= cache.transfer_count());
            for transfer in range {
                assert!(!covered[transfer], "transfer {transfer} owned twice");
                covered[transfer] = true;
                assert_eq!(cache.find_transaction_by_transfer_id(transfer), Some(id));
            }
        }
        assert!(covered.into_iter().all(|c| c));
    }

    #[test]
    fn sending_state_transitions() {
        let mut cache = cache();
        let sent = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        let failed = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        let cancelled = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        assert_eq!(
            cache.get_transaction(sent).unwrap().state,
            WalletLegacyTransactionState::Sending
        );
        assert_eq!(cache.get_transaction(sent).unwrap().total_amount, -110);

        assert!(cache.update_transaction_sending_state(sent, &Ok(())));
        assert!(cache.update_transaction_sending_state(
            failed,
            &Err(WalletError::InternalError("relay".into()))
        ));
        assert!(cache.update_transaction_sending_state(cancelled, &Err(WalletError::TxCancelled)));

        assert_eq!(state_of(&cache, sent), WalletLegacyTransactionState::Active);
        assert_eq!(state_of(&cache, failed), WalletLegacyTransactionState::Failed);
        assert_eq!(state_of(&cache, cancelled), WalletLegacyTransactionState::Cancelled);
    }

    #[test]
    fn relay_result_after_cancel_is_discarded() {
        let mut cache = cache();
        let id = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        cache
            .update_transaction(id, &signed(1), 40, &[output(7, 150)], SecretKey::default())
            .unwrap();
        assert_eq!(cache.unconfirmed_outs_amount(), 150);

        assert!(cache.update_transaction_sending_state(id, &Err(WalletError::TxCancelled)));
        assert!(!cache.update_transaction_sending_state(id, &Ok(())));
        assert_eq!(
            cache.get_transaction(id).unwrap().state,
            WalletLegacyTransactionState::Cancelled
        );
        // signed before the cancel, so the inputs may already be on the network
        assert_eq!(cache.unconfirmed_outs_amount(), 150);
        assert!(cache.is_used(&output(7, 150).reference()));

        assert_eq!(cache.delete_outdated_transactions(LIVE_TIME + 1), vec![id]);
        assert_eq!(state_of(&cache, id), WalletLegacyTransactionState::Cancelled);
        assert_eq!(cache.unconfirmed_outs_amount(), 0);
        assert!(!cache.is_used(&output(7, 150).reference()));
    }

    #[test]
    fn cancel_before_signing_reserves_nothing() {
        let mut cache = cache();
        let id = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        assert!(cache.update_transaction_sending_state(id, &Err(WalletError::TxCancelled)));
        assert_eq!(cache.unconfirmed_outs_amount(), 0);
        assert_eq!(cache.unconfirmed_transactions_amount(), 0);
    }

    #[test]
    fn observed_cancelled_send_releases_reservation() {
        let mut cache = cache();
        let id = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        let tx = signed(3);
        cache
            .update_transaction(id, &tx, 40, &[output(7, 150)], SecretKey::default())
            .unwrap();
        cache.update_transaction_sending_state(id, &Err(WalletError::TxCancelled));
        assert_eq!(cache.unconfirmed_transactions_amount(), 40);

        let mut observed = info(0, UNCONFIRMED_TRANSACTION_HEIGHT, vec![]);
        observed.transaction_hash = tx.hash();
        assert_eq!(cache.on_transaction_updated(&observed, -110, 0), Some((id, false)));
        assert_eq!(cache.unconfirmed_outs_amount(), 0);
        assert_eq!(state_of(&cache, id), WalletLegacyTransactionState::Cancelled);
    }

    #[test]
    fn observed_send_leaves_unconfirmed_registry() {
        let mut cache = cache();
        let id = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 0);
        let tx = signed(2);
        cache
            .update_transaction(id, &tx, 40, &[output(7, 150)], SecretKey::default())
            .unwrap();
        cache.update_transaction_sending_state(id, &Ok(()));
        assert_eq!(cache.unconfirmed_transactions_amount(), 40);

        let mut observed = info(0, UNCONFIRMED_TRANSACTION_HEIGHT, vec![]);
        observed.transaction_hash = tx.hash();
        assert_eq!(cache.on_transaction_updated(&observed, -110, 0), Some((id, false)));
        assert_eq!(cache.unconfirmed_transactions_amount(), 0);
        assert_eq!(cache.unconfirmed_outs_amount(), 0);

        observed.block_height = 12;
        assert_eq!(cache.on_transaction_updated(&observed, -110, 0), Some((id, false)));
        assert_eq!(cache.get_transaction(id).unwrap().block_height, 12);
    }

    #[test]
    fn external_transaction_is_created_and_undeleted() {
        let mut cache = cache();
        let incoming = info(3, 20, vec![]);
        let (id, created) = cache.on_transaction_updated(&incoming, 500, 0).unwrap();
        assert!(created);
        let record = cache.get_transaction(id).unwrap();
        assert_eq!(record.total_amount, 500);
        assert!(record.is_coinbase);
        assert_eq!(record.first_transfer_id, crate::wallet::types::INVALID_TRANSFER_ID);

        assert_eq!(cache.on_transaction_deleted(&incoming.transaction_hash), Some(id));
        assert_eq!(
            cache.get_transaction(id).unwrap().state,
            WalletLegacyTransactionState::Deleted
        );
        assert_eq!(cache.on_transaction_deleted(&incoming.transaction_hash), None);

        assert_eq!(cache.on_transaction_updated(&incoming, 500, 0), Some((id, false)));
        assert_eq!(
            cache.get_transaction(id).unwrap().state,
            WalletLegacyTransactionState::Active
        );
        assert_eq!(cache.transaction_count(), 1);
    }

    #[test]
    fn outdated_sends_and_orphans_expire() {
        let mut cache = cache();
        let relayed = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 10);
        cache
            .update_transaction(relayed, &signed(4), 0, &[], SecretKey::default())
            .unwrap();
        cache.update_transaction_sending_state(relayed, &Ok(()));
        let stuck = cache.add_new_transaction(110, 10, &[], &transfers(1), 0, 10);

        let confirmed = info(5, 30, vec![]);
        let (orphan, _) = cache.on_transaction_updated(&confirmed, 500, 0).unwrap();
        let mut demoted = confirmed.clone();
        demoted.block_height = UNCONFIRMED_TRANSACTION_HEIGHT;
        cache.on_transaction_updated(&demoted, 500, 50);

        assert!(cache.delete_outdated_transactions(100).is_empty());
        assert_eq!(cache.delete_outdated_transactions(200), vec![relayed, stuck]);
        assert_eq!(state_of(&cache, relayed), WalletLegacyTransactionState::Deleted);
        assert_eq!(state_of(&cache, stuck), WalletLegacyTransactionState::Failed);
        assert_eq!(state_of(&cache, orphan), WalletLegacyTransactionState::Active);

        assert_eq!(cache.delete_outdated_transactions(2000), vec![orphan]);
        assert_eq!(state_of(&cache, orphan), WalletLegacyTransactionState::Deleted);
    }

    #[test]
    fn payment_ids_group_confirmed_incoming_transactions() {
        let payment_id = "11".repeat(32);
        let extra = create_tx_extra_with_payment_id(&payment_id).unwrap();
        let id_hash = Hash::from_hex(&payment_id).unwrap();

        let mut cache = cache();
        cache.on_transaction_updated(&info(1, 10, extra.clone()), 500, 0);
        cache.on_transaction_updated(&info(2, UNCONFIRMED_TRANSACTION_HEIGHT, extra.clone()), 300, 0);
        cache.on_transaction_updated(&info(3, 11, extra), -200, 0);
        cache.on_transaction_updated(&info(4, 12, vec![]), 100, 0);

        let groups = cache.get_transactions_by_payment_ids(&[id_hash, Hash::new([9; 32])]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].transactions.len(), 1);
        assert_eq!(groups[0].transactions[0].hash, Hash::new([1; 32]));
        assert!(groups[1].transactions.is_empty());

        let restored =
            WalletUserTransactionsCache::from_state(cache.state().clone(), LIVE_TIME, GRACE_PERIOD);
        assert_eq!(
            restored.get_transactions_by_payment_ids(&[id_hash]),
            cache.get_transactions_by_payment_ids(&[id_hash])
        );
    }
}
