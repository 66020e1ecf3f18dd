//! Legacy single-account wallet
//!
//! [`WalletLegacy`] is the entry point. It owns the transfers synchronizer for
//! its account, keeps the user-facing history in a
//! [`WalletUserTransactionsCache`] and builds sends with the
//! [`WalletTransactionSender`](crate::signing::WalletTransactionSender).

pub mod config;
pub mod transactions_cache;
pub mod types;
pub mod unconfirmed_transactions;
pub mod wallet_legacy;
pub mod wallet_serializer;

pub use config::WalletConfig;
pub use transactions_cache::{TransactionsCacheState, WalletUserTransactionsCache};
pub use types::*;
pub use unconfirmed_transactions::{UnconfirmedTransferDetails, WalletUnconfirmedTransactions};
pub use wallet_legacy::WalletLegacy;
pub use wallet_serializer::{WalletDetails, WalletSerializer, WalletSnapshot};
