//! Transaction construction: input selection, destination splitting, decoys,
//! ring signing and relay

pub mod prepare;
pub mod transaction_sender;

pub use prepare::{
    destinations::{split_destinations, Destination, DustPolicy, SplitDestinations},
    input_selector::{InputSelection, InputSelector},
};
pub use transaction_sender::{PreparedTransaction, SendRequest, WalletTransactionSender};
