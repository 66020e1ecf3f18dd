//! Blockchain synchronization
//!
//! The [`Node`] trait is the wallet's only view of the network. The
//! [`TransfersSynchronizer`] pulls blocks and pool changes from it, the output
//! scanner picks out the account's outputs, and each [`TransfersSubscription`]
//! applies them to its container and notifies observers.

pub mod mocks;
pub mod node;
pub mod output_scanner;
pub mod subscription;
pub mod synchronizer;

pub use mocks::{InMemoryNode, MockFailureModes, NodeCallCounts};
pub use node::*;
pub use output_scanner::{find_owned_output_indices, scan_transaction, ScanKeys};
pub use subscription::{
    AccountSubscription, SynchronizationStart, TransfersObserver, TransfersSubscription,
};
pub use synchronizer::{SynchronizerState, TransfersSynchronizer};
