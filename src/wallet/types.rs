//! User-facing transaction history records

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::data_structures::types::{Hash, SecretKey, UNCONFIRMED_TRANSACTION_HEIGHT};

pub type TransactionId = usize;
pub type TransferId = usize;

pub const INVALID_TRANSACTION_ID: TransactionId = usize::MAX;
pub const INVALID_TRANSFER_ID: TransferId = usize::MAX;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum WalletLegacyTransactionState {
    /// Transaction is confirmed or waiting in the pool
    #[default]
    Active,
    /// Removed by a reorganization or expired from the pool
    Deleted,
    /// Being built or relayed
    Sending,
    Cancelled,
    Failed,
}

impl WalletLegacyTransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WalletLegacyTransactionState::Cancelled | WalletLegacyTransactionState::Failed
        )
    }
}

/// Destination of an outgoing transaction
#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct WalletLegacyTransfer {
    pub address: String,
    pub amount: i64,
}

impl WalletLegacyTransfer {
    pub fn new(address: impl Into<String>, amount: i64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct WalletLegacyTransaction {
    pub first_transfer_id: TransferId,
    pub transfer_count: usize,
    /// Signed balance change, negative for outgoing transactions
    pub total_amount: i64,
    pub fee: u64,
    pub sent_time: u64,
    pub unlock_time: u64,
    pub hash: Hash,
    pub secret_key: Option<SecretKey>,
    pub is_coinbase: bool,
    pub block_height: u32,
    pub timestamp: u64,
    pub extra: Vec<u8>,
    pub state: WalletLegacyTransactionState,
}

impl Default for WalletLegacyTransaction {
    fn default() -> Self {
        Self {
            first_transfer_id: INVALID_TRANSFER_ID,
            transfer_count: 0,
            total_amount: 0,
            fee: 0,
            sent_time: 0,
            unlock_time: 0,
            hash: Hash::default(),
            secret_key: None,
            is_coinbase: false,
            block_height: UNCONFIRMED_TRANSACTION_HEIGHT,
            timestamp: 0,
            extra: Vec::new(),
            state: WalletLegacyTransactionState::Active,
        }
    }
}

impl WalletLegacyTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.block_height != UNCONFIRMED_TRANSACTION_HEIGHT
    }

    /// Transfer ids belonging to this transaction
    pub fn transfer_range(&self) -> std::ops::Range<TransferId> {
        if self.first_transfer_id == INVALID_TRANSFER_ID {
            return 0..0;
        }
        self.first_transfer_id..self.first_transfer_id + self.transfer_count
    }
}

/// Transactions carrying one payment id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIdTransactions {
    pub payment_id: Hash,
    pub transactions: Vec<WalletLegacyTransaction>,
}

