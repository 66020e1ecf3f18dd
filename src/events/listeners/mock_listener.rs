//! Observer that records wallet events for assertions in tests

use std::{
    sync::Mutex,
    time::Duration,
};

use crate::{
    data_structures::types::Amount,
    errors::WalletResult,
    events::{WalletEvent, WalletLegacyObserver},
    wallet::types::TransactionId,
};

pub struct RecordingObserver {
    name: String,
    events: Mutex<Vec<WalletEvent>>,
}

impl RecordingObserver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: WalletEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<WalletEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn event_count(&self) -> usize {
        self.events().len()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    pub fn last_of(&self, event_type: &str) -> Option<WalletEvent> {
        self.events()
            .into_iter()
            .rev()
            .find(|event| event.event_type() == event_type)
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Poll until an event of `event_type` arrives or `timeout` elapses
    pub async fn wait_for_event(&self, event_type: &str, timeout: Duration) -> Option<WalletEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.last_of(event_type) {
                return Some(event);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl WalletLegacyObserver for RecordingObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_completed(&self, result: &WalletResult<()>) {
        self.record(WalletEvent::InitCompleted {
            result: result.clone(),
        });
    }

    fn save_completed(&self, result: &WalletResult<()>) {
        self.record(WalletEvent::SaveCompleted {
            result: result.clone(),
        });
    }

    fn synchronization_progress_updated(&self, current: u32, total: u32) {
        self.record(WalletEvent::SynchronizationProgressUpdated { current, total });
    }

    fn synchronization_completed(&self, result: &WalletResult<()>) {
        self.record(WalletEvent::SynchronizationCompleted {
            result: result.clone(),
        });
    }

    fn actual_balance_updated(&self, balance: Amount) {
        self.record(WalletEvent::ActualBalanceUpdated { balance });
    }

    fn pending_balance_updated(&self, balance: Amount) {
        self.record(WalletEvent::PendingBalanceUpdated { balance });
    }

    fn external_transaction_created(&self, id: TransactionId) {
        self.record(WalletEvent::ExternalTransactionCreated { id });
    }

    fn send_transaction_completed(&self, id: TransactionId, result: &WalletResult<()>) {
        self.record(WalletEvent::SendTransactionCompleted {
            id,
            result: result.clone(),
        });
    }

    fn transaction_updated(&self, id: TransactionId) {
        self.record(WalletEvent::TransactionUpdated { id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_call_order() {
        let observer = RecordingObserver::new("recorder");
        observer.actual_balance_updated(5);
        observer.transaction_updated(1);
        observer.actual_balance_updated(7);

        assert_eq!(observer.event_count(), 3);
        assert_eq!(observer.count_of("ActualBalanceUpdated"), 2);
        assert_eq!(
            observer.last_of("ActualBalanceUpdated"),
            Some(WalletEvent::ActualBalanceUpdated { balance: 7 })
        );
        observer.clear();
        assert_eq!(observer.event_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_event_times_out() {
        let observer = RecordingObserver::new("recorder");
        assert!(observer
            .wait_for_event("InitCompleted", Duration::from_millis(30))
            .await
            .is_none());
        observer.init_completed(&Ok(()));
        assert!(observer
            .wait_for_event("InitCompleted", Duration::from_millis(30))
            .await
            .is_some());
    }
}
