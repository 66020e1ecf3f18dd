//! Transaction model: prefix, inputs, outputs and ring signatures

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::fast_hash,
    data_structures::{
        extra::{get_payment_id_from_extra, get_transaction_public_key_from_extra},
        types::{Amount, Hash, KeyImage, PublicKey, Signature},
    },
};

pub const CURRENT_TRANSACTION_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum TransactionInput {
    /// Coinbase input
    Base { block_index: u32 },
    /// Ring input. `output_indexes` are relative offsets of global indices.
    Key {
        amount: Amount,
        output_indexes: Vec<u32>,
        key_image: KeyImage,
    },
    Multisignature {
        amount: Amount,
        signature_count: u8,
        output_index: u32,
    },
}

impl TransactionInput {
    pub fn amount(&self) -> Amount {
        match self {
            TransactionInput::Base { .. } => 0,
            TransactionInput::Key { amount, .. } | TransactionInput::Multisignature { amount, .. } => {
                *amount
            }
        }
    }

    /// Number of signatures the input requires
    pub fn signature_count(&self) -> usize {
        match self {
            TransactionInput::Base { .. } => 0,
            TransactionInput::Key { output_indexes, .. } => output_indexes.len(),
            TransactionInput::Multisignature {
                signature_count, ..
            } => *signature_count as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum TransactionOutputTarget {
    Key {
        key: PublicKey,
    },
    Multisignature {
        keys: Vec<PublicKey>,
        required_signature_count: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TransactionOutput {
    pub amount: Amount,
    pub target: TransactionOutputTarget,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

impl TransactionPrefix {
    pub fn hash(&self) -> Hash {
        fast_hash(&borsh::to_vec(self).unwrap_or_default())
    }
}

/// Full transaction: prefix plus one signature vector per input
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    pub fn prefix_hash(&self) -> Hash {
        self.prefix.hash()
    }

    pub fn hash(&self) -> Hash {
        fast_hash(&borsh::to_vec(self).unwrap_or_default())
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        get_transaction_public_key_from_extra(&self.prefix.extra)
    }

    pub fn payment_id(&self) -> Option<Hash> {
        get_payment_id_from_extra(&self.prefix.extra)
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(
            self.prefix.inputs.as_slice(),
            [TransactionInput::Base { .. }]
        )
    }

    pub fn binary_size(&self) -> usize {
        borsh::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }

    pub fn inputs_amount(&self) -> Amount {
        self.prefix
            .inputs
            .iter()
            .fold(0u64, |sum, input| sum.saturating_add(input.amount()))
    }

    pub fn outputs_amount(&self) -> Amount {
        self.prefix
            .outputs
            .iter()
            .fold(0u64, |sum, output| sum.saturating_add(output.amount))
    }
}

/// Convert sorted absolute global indices into relative offsets
pub fn absolute_output_offsets_to_relative(offsets: &[u32]) -> Vec<u32> {
    let mut previous = 0u32;
    offsets
        .iter()
        .map(|offset| {
            let relative = offset.wrapping_sub(previous);
            previous = *offset;
            relative
        })
        .collect()
}

pub fn relative_output_offsets_to_absolute(offsets: &[u32]) -> Vec<u32> {
    let mut current = 0u32;
    offsets
        .iter()
        .map(|offset| {
            current = current.wrapping_add(*offset);
            current
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::extra::add_transaction_public_key_to_extra;

    #[test]
    fn relative_offsets() {
        let absolute = vec![3, 10, 11, 40];
        let relative = absolute_output_offsets_to_relative(&absolute);
        assert_eq!(relative, vec![3, 7, 1, 29]);
        assert_eq!(relative_output_offsets_to_absolute(&relative), absolute);
    }

    #[test]
    fn coinbase_and_hash() {
        let mut extra = Vec::new();
        let key = PublicKey::new([5u8; 32]);
        add_transaction_public_key_to_extra(&mut extra, &key);
        let mut tx = Transaction {
            prefix: TransactionPrefix {
                version: CURRENT_TRANSACTION_VERSION,
                unlock_time: 70,
                inputs: vec![TransactionInput::Base { block_index: 10 }],
                outputs: vec![TransactionOutput {
                    amount: 100,
                    target: TransactionOutputTarget::Key {
                        key: PublicKey::new([1u8; 32]),
                    },
                }],
                extra,
            },
            signatures: vec![],
        };
        assert!(tx.is_coinbase());
        assert_eq!(tx.public_key(), Some(key));
        assert_eq!(tx.outputs_amount(), 100);

        let hash = tx.hash();
        let prefix_hash = tx.prefix_hash();
        tx.signatures.push(vec![Signature::default()]);
        assert_ne!(tx.hash(), hash);
        assert_eq!(tx.prefix_hash(), prefix_hash);
    }
}
