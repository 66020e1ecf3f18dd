//! Finds the outputs of a transaction that belong to an account

use tracing::debug;

use crate::{
    crypto,
    data_structures::{
        account::AccountPublicAddress,
        transaction::{Transaction, TransactionOutputTarget},
        types::{
            KeyDerivation, KeyImage, PublicKey, SecretKey,
            UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
        },
    },
    storage::stored_output::{
        OutputPayload, TransactionOutputInformation, TransactionOutputInformationIn,
    },
};

/// Keys the scanner needs. Without the spend secret no key images are produced,
/// so spends of the account's outputs are not detected.
#[derive(Debug, Clone)]
pub struct ScanKeys {
    pub address: AccountPublicAddress,
    pub view_secret_key: SecretKey,
    pub spend_secret_key: Option<SecretKey>,
}

/// Indices of the outputs of `tx` addressed to `address`
pub fn find_owned_output_indices(
    tx: &Transaction,
    address: &AccountPublicAddress,
    view_secret_key: &SecretKey,
) -> Vec<usize> {
    let Some(tx_public_key) = tx.public_key() else {
        return Vec::new();
    };
    let Some(derivation) = crypto::generate_key_derivation(&tx_public_key, view_secret_key) else {
        return Vec::new();
    };

    let mut owned = Vec::new();
    for (index, output) in tx.prefix.outputs.iter().enumerate() {
        let is_ours = match &output.target {
            TransactionOutputTarget::Key { key } => {
                crypto::derive_public_key(&derivation, index, &address.spend_public_key)
                    .map(|expected| expected == *key)
                    .unwrap_or(false)
            }
            TransactionOutputTarget::Multisignature { keys, .. } => keys.iter().any(|key| {
                crypto::derive_public_key(&derivation, index, &address.spend_public_key)
                    .map(|expected| expected == *key)
                    .unwrap_or(false)
            }),
        };
        if is_ours {
            owned.push(index);
        }
    }
    owned
}

/// Build container records for the owned outputs of `tx`.
///
/// `global_indices` is indexed by output position; pass `None` for pool
/// transactions, which get the unconfirmed sentinel.
pub fn scan_transaction(
    tx: &Transaction,
    keys: &ScanKeys,
    global_indices: Option<&[u32]>,
) -> Vec<TransactionOutputInformationIn> {
    let indices = find_owned_output_indices(tx, &keys.address, &keys.view_secret_key);
    if indices.is_empty() {
        return Vec::new();
    }
    let hash = tx.hash();
    let tx_public_key = tx.public_key().unwrap_or_default();
    let derivation = crypto::generate_key_derivation(&tx_public_key, &keys.view_secret_key);

    let mut result = Vec::with_capacity(indices.len());
    for index in indices {
        let output = &tx.prefix.outputs[index];
        let global_output_index = match global_indices {
            Some(global) => match global.get(index) {
                Some(value) => *value,
                None => {
                    debug!(transaction = %hash, index, "node returned too few global indices");
                    continue;
                }
            },
            None => UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX,
        };
        let (payload, key_image) = match &output.target {
            TransactionOutputTarget::Key { key } => {
                let key_image = match (&derivation, &keys.spend_secret_key) {
                    (Some(derivation), Some(spend)) => {
                        Some(output_key_image(derivation, index, spend, key))
                    }
                    _ => None,
                };
                (OutputPayload::Key { output_key: *key }, key_image)
            }
            TransactionOutputTarget::Multisignature {
                required_signature_count,
                ..
            } => (
                OutputPayload::Multisignature {
                    required_signatures: u32::from(*required_signature_count),
                },
                None,
            ),
        };
        result.push(TransactionOutputInformationIn {
            info: TransactionOutputInformation {
                payload,
                amount: output.amount,
                global_output_index,
                output_in_transaction: index as u32,
                transaction_hash: hash,
                transaction_public_key: tx_public_key,
            },
            key_image,
        });
    }
    result
}

fn output_key_image(
    derivation: &KeyDerivation,
    index: usize,
    spend_secret_key: &SecretKey,
    output_key: &PublicKey,
) -> KeyImage {
    let secret = crypto::derive_secret_key(derivation, index, spend_secret_key);
    crypto::generate_key_image(output_key, &secret)
}
