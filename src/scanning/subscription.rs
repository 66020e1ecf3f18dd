//! Per-account subscription: applies synchronizer events to the account's
//! container and notifies observers in apply order

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    data_structures::{
        account::AccountPublicAddress,
        transaction::Transaction,
        types::{Hash, UNCONFIRMED_TRANSACTION_HEIGHT},
    },
    scanning::{node::NodeError, output_scanner::ScanKeys},
    storage::{
        stored_output::{TransactionBlockInfo, TransactionOutputInformationIn},
        transfers_container::{ContainerParameters, DetachResult, TransfersContainer},
    },
};

/// Callbacks raised by a subscription. Called synchronously, must not block.
pub trait TransfersObserver: Send + Sync {
    fn on_transaction_updated(&self, _address: &AccountPublicAddress, _hash: &Hash) {}

    fn on_transaction_deleted(&self, _address: &AccountPublicAddress, _hash: &Hash) {}

    fn on_error(&self, _address: &AccountPublicAddress, _height: u32, _error: &NodeError) {}
}

/// Where scanning starts for an account. Blocks below either bound are skipped.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct SynchronizationStart {
    pub height: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct AccountSubscription {
    pub keys: ScanKeys,
    pub sync_start: SynchronizationStart,
}

pub struct TransfersSubscription {
    subscription: AccountSubscription,
    container: TransfersContainer,
    observers: Vec<Arc<dyn TransfersObserver>>,
}

impl TransfersSubscription {
    pub fn new(subscription: AccountSubscription, params: ContainerParameters) -> Self {
        Self {
            subscription,
            container: TransfersContainer::new(params),
            observers: Vec::new(),
        }
    }

    /// Resume a subscription with a previously saved container
    pub fn with_container(subscription: AccountSubscription, container: TransfersContainer) -> Self {
        Self {
            subscription,
            container,
            observers: Vec::new(),
        }
    }

    pub fn address(&self) -> &AccountPublicAddress {
        &self.subscription.keys.address
    }

    pub fn keys(&self) -> &ScanKeys {
        &self.subscription.keys
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        self.subscription.sync_start
    }

    pub fn container(&self) -> &TransfersContainer {
        &self.container
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TransfersObserver>) {
        self.observers.push(observer);
    }

    pub fn remove_observer(&mut self, observer: &Arc<dyn TransfersObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
        before != self.observers.len()
    }

    /// Whether a block at this height and time is past the subscription start
    pub fn is_block_relevant(&self, height: u32, timestamp: u64) -> bool {
        height >= self.subscription.sync_start.height
            && timestamp >= self.subscription.sync_start.timestamp
    }

    pub fn add_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        outputs: &[TransactionOutputInformationIn],
    ) -> bool {
        let added = self.container.add_transaction(block, tx, outputs);
        let hash = tx.hash();
        if added || self.container.is_tracked(&hash) {
            self.notify_updated(&hash);
        }
        added
    }

    pub fn on_blockchain_detach(&mut self, height: u32) {
        let result = self.container.detach(height);
        debug!(
            address = ?self.subscription.keys.address.spend_public_key,
            height,
            "subscription detached"
        );
        self.notify_detach(&result);
    }

    /// Report a synchronization error that invalidates blocks from `height` on
    pub fn on_error(&mut self, error: &NodeError, height: u32) {
        warn!(height, error = %error, "synchronization error");
        if height != UNCONFIRMED_TRANSACTION_HEIGHT {
            let result = self.container.detach(height);
            self.notify_detach(&result);
        }
        for observer in &self.observers {
            observer.on_error(&self.subscription.keys.address, height, error);
        }
    }

    pub fn mark_transaction_confirmed(
        &mut self,
        block: &TransactionBlockInfo,
        hash: &Hash,
        global_indices: &[u32],
    ) -> bool {
        let confirmed = self
            .container
            .mark_transaction_confirmed(block, hash, global_indices);
        if confirmed {
            self.notify_updated(hash);
        }
        confirmed
    }

    pub fn delete_unconfirmed_transaction(&mut self, hash: &Hash) -> bool {
        let deleted = self.container.delete_unconfirmed_transaction(hash);
        if deleted {
            self.notify_deleted(hash);
        }
        deleted
    }

    pub fn advance_height(&mut self, height: u32) -> bool {
        self.container.advance_height(height)
    }

    fn notify_detach(&self, result: &DetachResult) {
        for hash in &result.deleted {
            self.notify_deleted(hash);
        }
        for hash in &result.demoted {
            self.notify_updated(hash);
        }
    }

    fn notify_updated(&self, hash: &Hash) {
        for observer in &self.observers {
            observer.on_transaction_updated(&self.subscription.keys.address, hash);
        }
    }

    fn notify_deleted(&self, hash: &Hash) {
        for observer in &self.observers {
            observer.on_transaction_deleted(&self.subscription.keys.address, hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        data_structures::{
            account::AccountKeys,
            types::UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
        },
        storage::{
            output_status::TransferFlags,
            transfers_container::tests::{block, owned, params, transaction},
        },
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Updated(Hash),
        Deleted(Hash),
        Error(u32),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Seen>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Seen> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TransfersObserver for Recorder {
        fn on_transaction_updated(&self, _address: &AccountPublicAddress, hash: &Hash) {
            self.events.lock().unwrap().push(Seen::Updated(*hash));
        }

        fn on_transaction_deleted(&self, _address: &AccountPublicAddress, hash: &Hash) {
            self.events.lock().unwrap().push(Seen::Deleted(*hash));
        }

        fn on_error(&self, _address: &AccountPublicAddress, height: u32, _error: &NodeError) {
            self.events.lock().unwrap().push(Seen::Error(height));
        }
    }

    fn subscription() -> (TransfersSubscription, Arc<Recorder>) {
        let keys = AccountKeys::generate(&mut rand::thread_rng());
        let mut subscription = TransfersSubscription::new(
            AccountSubscription {
                keys: ScanKeys {
                    address: keys.address,
                    view_secret_key: keys.view_secret_key.clone(),
                    spend_secret_key: Some(keys.spend_secret_key.clone()),
                },
                sync_start: SynchronizationStart::default(),
            },
            params(),
        );
        let recorder = Arc::new(Recorder::default());
        subscription.add_observer(recorder.clone());
        (subscription, recorder)
    }

    fn add_at(subscription: &mut TransfersSubscription, seed: u8, height: u32) -> Hash {
        let tx = transaction(seed, &[100], &[]);
        let at = block(height);
        subscription.add_transaction(&at, &tx, &owned(&tx, seed, &at, u32::from(seed)));
        tx.hash()
    }

    #[test]
    fn detach_deletes_transactions_above_height() {
        let (mut subscription, recorder) = subscription();
        add_at(&mut subscription, 1, 10);
        let second = add_at(&mut subscription, 2, 11);
        assert_eq!(subscription.container().transactions_count(), 2);

        subscription.on_blockchain_detach(11);
        assert_eq!(subscription.container().transactions_count(), 1);
        let deleted: Vec<Seen> = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Seen::Deleted(_)))
            .collect();
        assert_eq!(deleted, vec![Seen::Deleted(second)]);
    }

    #[test]
    fn errors_detach_and_are_forwarded_in_order() {
        let (mut subscription, recorder) = subscription();
        add_at(&mut subscription, 1, 10);
        let second = add_at(&mut subscription, 2, 11);
        let error = NodeError::NetworkError("timeout".to_string());

        subscription.on_error(&error, 12);
        assert_eq!(subscription.container().transactions_count(), 2);
        subscription.on_error(&error, 11);
        assert_eq!(subscription.container().transactions_count(), 1);

        let tail: Vec<Seen> = recorder.events().into_iter().skip(2).collect();
        assert_eq!(
            tail,
            vec![Seen::Error(12), Seen::Deleted(second), Seen::Error(11)]
        );
    }

    #[test]
    fn error_for_unconfirmed_height_does_not_detach() {
        let (mut subscription, recorder) = subscription();
        add_at(&mut subscription, 1, 10);
        subscription.on_error(
            &NodeError::InternalError("pool".to_string()),
            UNCONFIRMED_TRANSACTION_HEIGHT,
        );
        assert_eq!(subscription.container().transactions_count(), 1);
        assert_eq!(
            recorder.events().last(),
            Some(&Seen::Error(UNCONFIRMED_TRANSACTION_HEIGHT))
        );
    }

    #[test]
    fn confirming_pool_transaction_notifies_again() {
        let (mut subscription, recorder) = subscription();
        let tx = transaction(7, &[250], &[]);
        let pool = TransactionBlockInfo::unconfirmed();
        subscription.add_transaction(&pool, &tx, &owned(&tx, 7, &pool, 0));
        assert!(subscription.mark_transaction_confirmed(&block(20), &tx.hash(), &[33]));

        assert_eq!(
            recorder.events(),
            vec![Seen::Updated(tx.hash()), Seen::Updated(tx.hash())]
        );
        let outputs = subscription
            .container()
            .get_transaction_outputs(&tx.hash(), TransferFlags::INCLUDE_ALL);
        assert_eq!(outputs[0].global_output_index, 33);
        assert_ne!(
            outputs[0].global_output_index,
            UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX
        );
    }

    #[test]
    fn duplicate_delivery_still_reports_tracked_transaction() {
        let (mut subscription, recorder) = subscription();
        let tx = transaction(8, &[10], &[]);
        let at = block(3);
        let outputs = owned(&tx, 8, &at, 0);
        assert!(subscription.add_transaction(&at, &tx, &outputs));
        assert!(!subscription.add_transaction(&at, &tx, &outputs));
        assert_eq!(recorder.events().len(), 2);

        let foreign = transaction(9, &[10], &[]);
        assert!(!subscription.add_transaction(&at, &foreign, &[]));
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn height_only_moves_forward() {
        let (mut subscription, _) = subscription();
        assert!(subscription.advance_height(5));
        assert!(!subscription.advance_height(4));
        assert_eq!(subscription.container().current_height(), 5);
    }

    #[test]
    fn deleting_pool_transaction_notifies() {
        let (mut subscription, recorder) = subscription();
        let tx = transaction(10, &[10], &[]);
        let pool = TransactionBlockInfo::unconfirmed();
        subscription.add_transaction(&pool, &tx, &owned(&tx, 10, &pool, 0));
        assert!(subscription.delete_unconfirmed_transaction(&tx.hash()));
        assert_eq!(recorder.events().last(), Some(&Seen::Deleted(tx.hash())));
        assert!(!subscription.delete_unconfirmed_transaction(&tx.hash()));
    }
}
