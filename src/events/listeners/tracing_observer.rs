//! Observer that writes wallet events to `tracing`

use tracing::{debug, info, warn};

use crate::{
    data_structures::types::Amount,
    errors::WalletResult,
    events::WalletLegacyObserver,
    wallet::types::TransactionId,
};

/// Verbosity of [`TracingObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Completions and failures only
    Minimal,
    /// Plus balance and transaction changes
    #[default]
    Normal,
    /// Plus synchronization progress
    Verbose,
}

#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    level: LogLevel,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: LogLevel) -> Self {
        Self { level }
    }

    fn log_result(&self, what: &str, result: &WalletResult<()>) {
        match result {
            Ok(()) => info!("{what} completed"),
            Err(error) => warn!(error = %error, "{what} failed"),
        }
    }
}

impl WalletLegacyObserver for TracingObserver {
    fn name(&self) -> &str {
        "TracingObserver"
    }

    fn init_completed(&self, result: &WalletResult<()>) {
        self.log_result("wallet init", result);
    }

    fn save_completed(&self, result: &WalletResult<()>) {
        self.log_result("wallet save", result);
    }

    fn synchronization_progress_updated(&self, current: u32, total: u32) {
        if self.level >= LogLevel::Verbose {
            debug!(current, total, "synchronization progress");
        }
    }

    fn synchronization_completed(&self, result: &WalletResult<()>) {
        self.log_result("synchronization", result);
    }

    fn actual_balance_updated(&self, balance: Amount) {
        if self.level >= LogLevel::Normal {
            info!(balance, "actual balance updated");
        }
    }

    fn pending_balance_updated(&self, balance: Amount) {
        if self.level >= LogLevel::Normal {
            info!(balance, "pending balance updated");
        }
    }

    fn external_transaction_created(&self, id: TransactionId) {
        if self.level >= LogLevel::Normal {
            info!(id, "external transaction");
        }
    }

    fn send_transaction_completed(&self, id: TransactionId, result: &WalletResult<()>) {
        match result {
            Ok(()) => info!(id, "transaction sent"),
            Err(error) => warn!(id, error = %error, "transaction send failed"),
        }
    }

    fn transaction_updated(&self, id: TransactionId) {
        if self.level >= LogLevel::Normal {
            debug!(id, "transaction updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDispatcher, WalletEvent};
    use std::sync::Arc;

    #[test]
    fn logs_without_panicking() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut dispatcher = EventDispatcher::new();
        dispatcher
            .register(Arc::new(TracingObserver::with_level(LogLevel::Verbose)))
            .unwrap();
        dispatcher.dispatch(&WalletEvent::SynchronizationProgressUpdated {
            current: 1,
            total: 2,
        });
        dispatcher.dispatch(&WalletEvent::SendTransactionCompleted {
            id: 0,
            result: Err(crate::errors::WalletError::TxCancelled),
        });
        assert_eq!(dispatcher.get_stats().total_events_dispatched, 2);
    }
}
