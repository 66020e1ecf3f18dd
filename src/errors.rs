//! Error types for the wallet libraries
//!
//! Local validation and lifecycle problems are reported with [`WalletError`].
//! Errors produced by the node layer are carried unchanged inside
//! [`WalletError::Node`] so callers can tell "the wallet rejected this" apart
//! from "the network rejected this".

use thiserror::Error;

use crate::scanning::node::NodeError;

/// Crate-wide error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    // === Lifecycle ===
    #[error("Wallet is not initialized")]
    NotInitialized,

    #[error("Wallet is already initialized")]
    AlreadyInitialized,

    #[error("Wallet is in a wrong state for this operation")]
    WrongState,

    // === Validation ===
    #[error("Bad address: {0}")]
    BadAddress(String),

    #[error("Wrong amount")]
    WrongAmount,

    #[error("Transaction has no destinations")]
    ZeroDestination,

    #[error("Mixin count {requested} is too big, maximum is {max}")]
    MixinCountTooBig { requested: u64, max: u64 },

    #[error("Fee {fee} is too small, minimum is {minimum}")]
    FeeTooSmall { fee: u64, minimum: u64 },

    // === Transfers ===
    #[error("Not enough unlocked money: needed {needed}, available {available}")]
    TxTransferImpossible { needed: u64, available: u64 },

    #[error("Transaction can not be cancelled")]
    TxCancelImpossible,

    #[error("Transaction was cancelled")]
    TxCancelled,

    #[error("Transaction size {size} exceeds limit {limit}")]
    TransactionSizeTooBig { size: usize, limit: usize },

    #[error("Transaction is not a valid fusion transaction")]
    NotFusionTransaction,

    // === Keys ===
    #[error("Wrong password")]
    WrongPassword,

    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    // === Generic ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// Node-layer errors are forwarded without remapping
    #[error(transparent)]
    Node(#[from] NodeError),
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for WalletError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        WalletError::InternalError(format!("wallet state lock poisoned: {err}"))
    }
}

/// Result alias used throughout the crate
pub type WalletResult<T> = Result<T, WalletError>;
