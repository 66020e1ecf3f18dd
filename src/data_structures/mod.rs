pub mod account;
pub mod extra;
pub mod transaction;
pub mod types;

pub use account::{AccountKeys, AccountPublicAddress};
pub use transaction::{
    Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget, TransactionPrefix,
};
pub use types::*;
