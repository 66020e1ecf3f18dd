//! Wallet behaviour settings passed at construction

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signing::prepare::destinations::DustPolicy;

/// Settings for a [`WalletLegacy`](crate::wallet::WalletLegacy) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// How long a relayed transaction may stay unseen before it is dropped
    pub unconfirmed_transaction_live_time: Duration,
    /// How long a transaction demoted by a reorganization may wait for a new block
    pub orphaned_transaction_grace_period: Duration,
    /// What to do with change below the dust threshold
    pub dust_policy: DustPolicy,
    /// Blocks applied per state lock acquisition while synchronizing
    pub sync_batch_size: usize,
    /// Ring size used when sizing fusion transactions
    pub default_mixin: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            unconfirmed_transaction_live_time: Duration::from_secs(60 * 60 * 24),
            orphaned_transaction_grace_period: Duration::from_secs(60 * 60 * 24 * 7),
            dust_policy: DustPolicy::AddToFee,
            sync_batch_size: 100,
            default_mixin: 0,
        }
    }
}

impl WalletConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unconfirmed_transaction_live_time(mut self, live_time: Duration) -> Self {
        self.unconfirmed_transaction_live_time = live_time;
        self
    }

    pub fn with_orphaned_transaction_grace_period(mut self, grace_period: Duration) -> Self {
        self.orphaned_transaction_grace_period = grace_period;
        self
    }

    pub fn with_dust_policy(mut self, policy: DustPolicy) -> Self {
        self.dust_policy = policy;
        self
    }

    pub fn with_sync_batch_size(mut self, batch_size: usize) -> Self {
        self.sync_batch_size = batch_size.max(1);
        self
    }

    pub fn with_default_mixin(mut self, mixin: u64) -> Self {
        self.default_mixin = mixin;
        self
    }
}
