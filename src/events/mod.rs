//! Wallet observer API
//!
//! Wallet notifications are modelled as [`WalletEvent`] values. The facade
//! collects them while it holds its state lock and hands them to the
//! [`EventDispatcher`] once the lock is released, so observers may call back
//! into the wallet.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cryptonote_wallet_libs::events::{EventDispatcher, WalletEvent};
//! use cryptonote_wallet_libs::events::listeners::RecordingObserver;
//!
//! let mut dispatcher = EventDispatcher::new();
//! let recorder = Arc::new(RecordingObserver::new("recorder"));
//! dispatcher.register(recorder.clone()).unwrap();
//! dispatcher.dispatch(&WalletEvent::ActualBalanceUpdated { balance: 10 });
//! assert_eq!(recorder.event_count(), 1);
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    data_structures::types::Amount,
    errors::WalletResult,
    wallet::types::TransactionId,
};

pub mod listeners;

/// Callbacks raised by a wallet. Every method defaults to a no-op.
///
/// Called outside the wallet's state lock, in the order the events happened.
pub trait WalletLegacyObserver: Send + Sync {
    /// Name used for registration; must be unique per dispatcher
    fn name(&self) -> &str {
        "UnnamedObserver"
    }

    fn init_completed(&self, _result: &WalletResult<()>) {}

    fn save_completed(&self, _result: &WalletResult<()>) {}

    fn synchronization_progress_updated(&self, _current: u32, _total: u32) {}

    fn synchronization_completed(&self, _result: &WalletResult<()>) {}

    fn actual_balance_updated(&self, _balance: Amount) {}

    fn pending_balance_updated(&self, _balance: Amount) {}

    fn external_transaction_created(&self, _id: TransactionId) {}

    fn send_transaction_completed(&self, _id: TransactionId, _result: &WalletResult<()>) {}

    fn transaction_updated(&self, _id: TransactionId) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    InitCompleted {
        result: WalletResult<()>,
    },
    SaveCompleted {
        result: WalletResult<()>,
    },
    SynchronizationProgressUpdated {
        current: u32,
        total: u32,
    },
    SynchronizationCompleted {
        result: WalletResult<()>,
    },
    ActualBalanceUpdated {
        balance: Amount,
    },
    PendingBalanceUpdated {
        balance: Amount,
    },
    ExternalTransactionCreated {
        id: TransactionId,
    },
    SendTransactionCompleted {
        id: TransactionId,
        result: WalletResult<()>,
    },
    TransactionUpdated {
        id: TransactionId,
    },
}

impl WalletEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::InitCompleted { .. } => "InitCompleted",
            WalletEvent::SaveCompleted { .. } => "SaveCompleted",
            WalletEvent::SynchronizationProgressUpdated { .. } => "SynchronizationProgressUpdated",
            WalletEvent::SynchronizationCompleted { .. } => "SynchronizationCompleted",
            WalletEvent::ActualBalanceUpdated { .. } => "ActualBalanceUpdated",
            WalletEvent::PendingBalanceUpdated { .. } => "PendingBalanceUpdated",
            WalletEvent::ExternalTransactionCreated { .. } => "ExternalTransactionCreated",
            WalletEvent::SendTransactionCompleted { .. } => "SendTransactionCompleted",
            WalletEvent::TransactionUpdated { .. } => "TransactionUpdated",
        }
    }

    /// Call the observer method matching this event
    pub fn deliver(&self, observer: &dyn WalletLegacyObserver) {
        match self {
            WalletEvent::InitCompleted { result } => observer.init_completed(result),
            WalletEvent::SaveCompleted { result } => observer.save_completed(result),
            WalletEvent::SynchronizationProgressUpdated { current, total } => {
                observer.synchronization_progress_updated(*current, *total)
            }
            WalletEvent::SynchronizationCompleted { result } => {
                observer.synchronization_completed(result)
            }
            WalletEvent::ActualBalanceUpdated { balance } => observer.actual_balance_updated(*balance),
            WalletEvent::PendingBalanceUpdated { balance } => {
                observer.pending_balance_updated(*balance)
            }
            WalletEvent::ExternalTransactionCreated { id } => observer.external_transaction_created(*id),
            WalletEvent::SendTransactionCompleted { id, result } => {
                observer.send_transaction_completed(*id, result)
            }
            WalletEvent::TransactionUpdated { id } => observer.transaction_updated(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventDispatcherError {
    #[error("Observer with name '{0}' is already registered")]
    DuplicateListener(String),

    #[error("Cannot register observer: maximum of {max} observers allowed, currently have {current}")]
    TooManyListeners { current: usize, max: usize },

    #[error("Invalid observer name: '{0}'")]
    InvalidListenerName(String),
}

#[derive(Debug, Default, Clone)]
pub struct EventStats {
    pub total_events_dispatched: usize,
    pub total_observer_calls: usize,
    pub events_by_type: HashMap<String, usize>,
}

/// Registry of wallet observers
#[derive(Default)]
pub struct EventDispatcher {
    observers: Vec<Arc<dyn WalletLegacyObserver>>,
    registered_names: HashSet<String>,
    max_observers: Option<usize>,
    stats: EventStats,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_limit(max_observers: usize) -> Self {
        Self {
            max_observers: Some(max_observers),
            ..Self::default()
        }
    }

    /// Register an observer. Observers are notified in registration order.
    ///
    /// # Errors
    ///
    /// * `InvalidListenerName` - the name is empty
    /// * `DuplicateListener` - an observer with the same name is registered
    /// * `TooManyListeners` - the configured limit is reached
    pub fn register(
        &mut self,
        observer: Arc<dyn WalletLegacyObserver>,
    ) -> Result<(), EventDispatcherError> {
        let name = observer.name().to_string();
        if name.trim().is_empty() {
            return Err(EventDispatcherError::InvalidListenerName(name));
        }
        if self.registered_names.contains(&name) {
            return Err(EventDispatcherError::DuplicateListener(name));
        }
        if let Some(max) = self.max_observers {
            if self.observers.len() >= max {
                return Err(EventDispatcherError::TooManyListeners {
                    current: self.observers.len(),
                    max,
                });
            }
        }
        debug!(observer = %name, "registering wallet observer");
        self.registered_names.insert(name);
        self.observers.push(observer);
        Ok(())
    }

    /// Remove the observer registered under `name`
    pub fn unregister(&mut self, name: &str) -> bool {
        if !self.registered_names.remove(name) {
            return false;
        }
        self.observers.retain(|observer| observer.name() != name);
        debug!(observer = %name, "wallet observer removed");
        true
    }

    pub fn listener_count(&self) -> usize {
        self.observers.len()
    }

    /// Record the events as dispatched and return the observers to notify.
    /// Used by callers that must not hold the dispatcher while notifying.
    pub fn prepare(&mut self, events: &[WalletEvent]) -> Vec<Arc<dyn WalletLegacyObserver>> {
        for event in events {
            self.stats.total_events_dispatched += 1;
            self.stats.total_observer_calls += self.observers.len();
            *self
                .stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }
        self.observers.clone()
    }

    pub fn dispatch(&mut self, event: &WalletEvent) {
        let observers = self.prepare(std::slice::from_ref(event));
        notify(&observers, std::slice::from_ref(event));
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.clone()
    }
}

/// Deliver `events` to every observer, event by event
pub fn notify(observers: &[Arc<dyn WalletLegacyObserver>], events: &[WalletEvent]) {
    for event in events {
        trace!(event = event.event_type(), observers = observers.len(), "dispatching");
        for observer in observers {
            event.deliver(observer.as_ref());
        }
    }
}
