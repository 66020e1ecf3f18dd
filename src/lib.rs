//! Legacy CryptoNote wallet libraries
//!
//! This crate tracks the outputs of a single CryptoNote account, keeps its
//! transaction history and builds ring-signed transfers.
//!
//! ## Layout
//!
//! - [`storage`]: the transfers container, the per-account index of owned
//!   outputs with lock and spend state
//! - [`scanning`]: the node interface, output scanning, subscriptions and the
//!   blockchain synchronizer
//! - [`signing`]: input selection, destination splitting and the transaction
//!   sender
//! - [`wallet`]: the user transactions cache, the encrypted wallet file and
//!   the [`WalletLegacy`] facade
//! - [`events`]: the observer API
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cryptonote_wallet_libs::{Currency, InMemoryNode, WalletConfig, WalletLegacy};
//!
//! # async fn run() -> cryptonote_wallet_libs::WalletResult<()> {
//! let node = Arc::new(InMemoryNode::default());
//! let wallet = WalletLegacy::new(Currency::default(), node, WalletConfig::default());
//! wallet.init_and_generate("password")?;
//! wallet.synchronize().await?;
//! println!("{} has {}", wallet.get_address()?, wallet.actual_balance()?);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod crypto;
pub mod data_structures;
pub mod errors;
pub mod events;
pub mod scanning;
pub mod signing;
pub mod storage;
pub mod wallet;

pub use common::Currency;
pub use errors::*;
pub use scanning::*;
pub use storage::*;
pub use wallet::*;
