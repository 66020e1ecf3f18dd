use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{
    data_structures::{
        extra::get_payment_id_from_extra,
        types::{
            Amount, Hash, KeyImage, PublicKey, UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
            UNCONFIRMED_TRANSACTION_HEIGHT,
        },
    },
    storage::output_status::OutputType,
};

/// Type-specific part of an owned output
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum OutputPayload {
    Key { output_key: PublicKey },
    Multisignature { required_signatures: u32 },
}

/// Position of an output: owning transaction and index within it
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct OutputReference {
    pub transaction_hash: Hash,
    pub output_in_transaction: u32,
}

/// An output owned by the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TransactionOutputInformation {
    pub payload: OutputPayload,
    pub amount: Amount,
    /// Global index among outputs of the same amount, sentinel while unconfirmed
    pub global_output_index: u32,
    pub output_in_transaction: u32,
    pub transaction_hash: Hash,
    pub transaction_public_key: PublicKey,
}

impl TransactionOutputInformation {
    pub fn output_type(&self) -> OutputType {
        match self.payload {
            OutputPayload::Key { .. } => OutputType::Key,
            OutputPayload::Multisignature { .. } => OutputType::Multisignature,
        }
    }

    pub fn output_key(&self) -> Option<PublicKey> {
        match self.payload {
            OutputPayload::Key { output_key } => Some(output_key),
            OutputPayload::Multisignature { .. } => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.global_output_index != UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX
    }

    pub fn reference(&self) -> OutputReference {
        OutputReference {
            transaction_hash: self.transaction_hash,
            output_in_transaction: self.output_in_transaction,
        }
    }
}

/// Owned output as produced by the output scanner, with the key image for key outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TransactionOutputInformationIn {
    pub info: TransactionOutputInformation,
    pub key_image: Option<KeyImage>,
}

/// Block position of a transaction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct TransactionBlockInfo {
    pub height: u32,
    pub timestamp: u64,
    pub transaction_index: u32,
}

impl TransactionBlockInfo {
    pub fn unconfirmed() -> Self {
        Self {
            height: UNCONFIRMED_TRANSACTION_HEIGHT,
            timestamp: 0,
            transaction_index: 0,
        }
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.height == UNCONFIRMED_TRANSACTION_HEIGHT
    }
}

/// An owned output together with the transaction that spent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TransactionSpentOutputInformation {
    pub output: TransactionOutputInformation,
    pub key_image: Option<KeyImage>,
    pub spending_block: TransactionBlockInfo,
    pub spending_transaction_hash: Hash,
    pub input_in_transaction: u32,
}

/// Metadata of a transaction relevant to the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TransactionInformation {
    pub transaction_hash: Hash,
    pub public_key: PublicKey,
    pub block_height: u32,
    pub timestamp: u64,
    pub unlock_time: u64,
    pub total_amount_in: Amount,
    pub total_amount_out: Amount,
    pub extra: Vec<u8>,
    pub payment_id: Option<Hash>,
}

impl TransactionInformation {
    pub fn is_confirmed(&self) -> bool {
        self.block_height != UNCONFIRMED_TRANSACTION_HEIGHT
    }

    pub fn refresh_payment_id(&mut self) {
        self.payment_id = get_payment_id_from_extra(&self.extra);
    }
}
