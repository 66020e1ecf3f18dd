//! Builds, signs and relays spending transactions
//!
//! Sending runs in stages so the wallet can hold its state lock only around
//! the local steps:
//!
//! 1. [`WalletTransactionSender::make_send_request`] validates the transfers and
//!    selects inputs. All validation errors are raised here, before any node
//!    call.
//! 2. [`WalletTransactionSender::fetch_decoys`] asks the node for ring members.
//! 3. [`WalletTransactionSender::build_transaction`] derives output keys and
//!    ring-signs every input.
//! 4. [`WalletTransactionSender::relay`] submits the result.

use std::collections::BTreeSet;

use rand::{rngs::OsRng, Rng};
use tracing::{debug, info};

use crate::{
    common::{decompose_amount_into_digits, Currency},
    crypto,
    data_structures::{
        account::AccountKeys,
        extra::add_transaction_public_key_to_extra,
        transaction::{
            absolute_output_offsets_to_relative, Transaction, TransactionInput, TransactionOutput,
            TransactionOutputTarget, TransactionPrefix, CURRENT_TRANSACTION_VERSION,
        },
        types::{Amount, Hash, PublicKey, SecretKey},
    },
    errors::{WalletError, WalletResult},
    scanning::node::{Node, RandomOutEntry},
    signing::prepare::{
        destinations::{split_destinations, Destination, DustPolicy},
        input_selector::InputSelector,
    },
    storage::{
        output_status::TransferFlags, stored_output::OutputReference,
        stored_output::TransactionOutputInformation, transfers_container::TransfersContainer,
    },
    wallet::types::WalletLegacyTransfer,
};

/// Approximate serialized size of one key input, without its ring
const KEY_INPUT_BASE_SIZE: usize = 49;
/// Approximate serialized size added per ring member (offset + signature)
const KEY_INPUT_RING_MEMBER_SIZE: usize = 68;
const KEY_OUTPUT_SIZE: usize = 42;
const TRANSACTION_OVERHEAD_SIZE: usize = 100;
/// Outputs reserved when sizing a fusion transaction
const FUSION_RESERVED_OUTPUTS: usize = 20;

/// A validated send with its inputs chosen, ready for decoys and signing
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub inputs: Vec<TransactionOutputInformation>,
    pub destinations: Vec<Destination>,
    /// Requested fee plus change dust
    pub fee: Amount,
    /// Amount returning to the account
    pub change: Amount,
    pub extra: Vec<u8>,
    pub mix_in: u64,
    pub unlock_time: u64,
    /// Signed balance change caused by the transaction
    pub total_amount: i64,
    pub is_fusion: bool,
}

impl SendRequest {
    pub fn inputs_amount(&self) -> Amount {
        self.inputs.iter().map(|o| o.amount).sum()
    }
}

/// Signed transaction together with the data the wallet records about it
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub transaction: Transaction,
    pub hash: Hash,
    pub secret_key: SecretKey,
    pub used_outputs: Vec<TransactionOutputInformation>,
    pub fee: Amount,
    pub change: Amount,
    pub total_amount: i64,
}

#[derive(Clone)]
pub struct WalletTransactionSender {
    currency: Currency,
    keys: AccountKeys,
    dust_policy: DustPolicy,
}

impl WalletTransactionSender {
    pub fn new(currency: Currency, keys: AccountKeys, dust_policy: DustPolicy) -> Self {
        Self {
            currency,
            keys,
            dust_policy,
        }
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Validate an ordinary send and select its inputs.
    ///
    /// `excluded` lists outputs already consumed by unconfirmed sends.
    #[allow(clippy::too_many_arguments)]
    pub fn make_send_request<R: Rng + ?Sized>(
        &self,
        container: &TransfersContainer,
        excluded: &BTreeSet<OutputReference>,
        transfers: &[WalletLegacyTransfer],
        fee: Amount,
        extra: &[u8],
        mix_in: u64,
        unlock_timestamp: u64,
        rng: &mut R,
    ) -> WalletResult<SendRequest> {
        let mut destinations = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            let address = self.currency.parse_account_address_string(&transfer.address)?;
            destinations.push((address, transfer.amount));
        }
        if destinations.is_empty() {
            return Err(WalletError::ZeroDestination);
        }

        let mut sent: Amount = 0;
        let mut parsed = Vec::with_capacity(destinations.len());
        for (address, amount) in destinations {
            if amount <= 0 {
                return Err(WalletError::WrongAmount);
            }
            let amount = amount as Amount;
            sent = sent.checked_add(amount).ok_or(WalletError::WrongAmount)?;
            parsed.push(Destination { address, amount });
        }
        if mix_in > self.currency.max_mixin {
            return Err(WalletError::MixinCountTooBig {
                requested: mix_in,
                max: self.currency.max_mixin,
            });
        }
        if fee < self.currency.minimum_fee {
            return Err(WalletError::FeeTooSmall {
                fee,
                minimum: self.currency.minimum_fee,
            });
        }
        let needed = sent.checked_add(fee).ok_or(WalletError::WrongAmount)?;

        let candidates: Vec<TransactionOutputInformation> = container
            .get_outputs(TransferFlags::INCLUDE_KEY_UNLOCKED)
            .into_iter()
            .filter(|output| !excluded.contains(&output.reference()))
            .collect();
        let selection = InputSelector::new(self.currency.default_dust_threshold, mix_in == 0)
            .select(candidates, needed, rng);
        if !selection.is_sufficient(needed) {
            return Err(WalletError::TxTransferImpossible {
                needed,
                available: selection.total_value,
            });
        }

        let change = selection.total_value - needed;
        let change_destination = (change > 0).then_some(Destination {
            address: self.keys.address,
            amount: change,
        });
        let split = split_destinations(
            &parsed,
            change_destination,
            self.currency.default_dust_threshold,
            self.dust_policy,
        );
        let spent = needed
            .checked_add(split.dust_to_fee)
            .and_then(|spent| i64::try_from(spent).ok())
            .ok_or(WalletError::WrongAmount)?;
        debug!(
            inputs = selection.outputs.len(),
            outputs = split.outputs.len(),
            needed,
            change,
            "send request prepared"
        );

        Ok(SendRequest {
            inputs: selection.outputs,
            destinations: split.outputs,
            fee: fee + split.dust_to_fee,
            change: change - split.dust_to_fee,
            extra: extra.to_vec(),
            mix_in,
            unlock_time: unlock_timestamp,
            total_amount: -spent,
            is_fusion: false,
        })
    }

    /// Consolidate caller-chosen outputs into digit amounts sent back to the account
    pub fn make_send_fusion_request(
        &self,
        fusion_inputs: Vec<TransactionOutputInformation>,
        mix_in: u64,
        extra: &[u8],
    ) -> WalletResult<SendRequest> {
        if mix_in > self.currency.max_mixin {
            return Err(WalletError::MixinCountTooBig {
                requested: mix_in,
                max: self.currency.max_mixin,
            });
        }
        let input_amounts: Vec<Amount> = fusion_inputs.iter().map(|o| o.amount).collect();
        let total = input_amounts
            .iter()
            .try_fold(0u64, |sum, amount| sum.checked_add(*amount))
            .ok_or(WalletError::WrongAmount)?;
        let (mut output_amounts, dust) =
            decompose_amount_into_digits(total, self.currency.default_dust_threshold);
        if dust > 0 {
            output_amounts.push(dust);
        }
        if !self
            .currency
            .is_fusion_transaction(&input_amounts, &output_amounts, 0)
        {
            return Err(WalletError::NotFusionTransaction);
        }
        let address = self.keys.address;
        Ok(SendRequest {
            inputs: fusion_inputs,
            destinations: output_amounts
                .into_iter()
                .map(|amount| Destination { address, amount })
                .collect(),
            fee: 0,
            change: total,
            extra: extra.to_vec(),
            mix_in,
            unlock_time: 0,
            total_amount: 0,
            is_fusion: true,
        })
    }

    /// Largest number of inputs a fusion transaction may carry at `mix_in`
    pub fn max_fusion_inputs(&self, mix_in: u64) -> usize {
        let input_size = KEY_INPUT_BASE_SIZE + KEY_INPUT_RING_MEMBER_SIZE * (mix_in as usize + 1);
        self.currency
            .fusion_tx_max_size
            .saturating_sub(TRANSACTION_OVERHEAD_SIZE + FUSION_RESERVED_OUTPUTS * KEY_OUTPUT_SIZE)
            / input_size
    }

    /// Ring members for every input, real output excluded, ascending global index.
    /// The node may return fewer than requested.
    pub async fn fetch_decoys(
        &self,
        node: &dyn Node,
        request: &SendRequest,
    ) -> WalletResult<Vec<Vec<RandomOutEntry>>> {
        if request.mix_in == 0 {
            return Ok(vec![Vec::new(); request.inputs.len()]);
        }
        let mut amounts: Vec<Amount> = request.inputs.iter().map(|o| o.amount).collect();
        amounts.sort_unstable();
        amounts.dedup();
        let outs = node
            .get_random_outs_by_amounts(&amounts, request.mix_in + 1)
            .await?;

        let decoys = request
            .inputs
            .iter()
            .map(|input| {
                let mut candidates: Vec<RandomOutEntry> = outs
                    .iter()
                    .filter(|outs| outs.amount == input.amount)
                    .flat_map(|outs| outs.outs.iter().copied())
                    .filter(|out| out.global_amount_index != input.global_output_index)
                    .collect();
                candidates.sort_by_key(|out| out.global_amount_index);
                candidates.dedup_by_key(|out| out.global_amount_index);
                candidates.truncate(request.mix_in as usize);
                if candidates.len() < request.mix_in as usize {
                    debug!(
                        amount = input.amount,
                        requested = request.mix_in,
                        received = candidates.len(),
                        "node returned fewer decoys than requested"
                    );
                }
                candidates
            })
            .collect();
        Ok(decoys)
    }

    /// Derive output keys and sign every input with its ring
    pub fn build_transaction(
        &self,
        request: &SendRequest,
        decoys: Vec<Vec<RandomOutEntry>>,
    ) -> WalletResult<PreparedTransaction> {
        if decoys.len() != request.inputs.len() {
            return Err(WalletError::InternalError(
                "decoy sets do not match inputs".to_string(),
            ));
        }
        let mut rng = OsRng;
        let tx_key = crypto::generate_keys(&mut rng);
        let mut extra = Vec::with_capacity(33 + request.extra.len());
        add_transaction_public_key_to_extra(&mut extra, &tx_key.public_key);
        extra.extend_from_slice(&request.extra);

        let mut outputs = Vec::with_capacity(request.destinations.len());
        for (index, destination) in request.destinations.iter().enumerate() {
            let derivation = crypto::generate_key_derivation(
                &destination.address.view_public_key,
                &tx_key.secret_key,
            )
            .ok_or_else(|| WalletError::BadAddress("invalid view public key".to_string()))?;
            let key = crypto::derive_public_key(
                &derivation,
                index,
                &destination.address.spend_public_key,
            )
            .ok_or_else(|| WalletError::BadAddress("invalid spend public key".to_string()))?;
            outputs.push(TransactionOutput {
                amount: destination.amount,
                target: TransactionOutputTarget::Key { key },
            });
        }

        let mut inputs = Vec::with_capacity(request.inputs.len());
        let mut signing = Vec::with_capacity(request.inputs.len());
        for (source, ring_decoys) in request.inputs.iter().zip(decoys) {
            let (input_secret, output_key) = self.input_secret(source)?;
            let key_image = crypto::generate_key_image(&output_key, &input_secret);

            let mut ring = ring_decoys;
            let position = ring
                .iter()
                .position(|out| out.global_amount_index > source.global_output_index)
                .unwrap_or(ring.len());
            ring.insert(
                position,
                RandomOutEntry {
                    global_amount_index: source.global_output_index,
                    out_key: output_key,
                },
            );
            let absolute: Vec<u32> = ring.iter().map(|out| out.global_amount_index).collect();
            let ring_keys: Vec<PublicKey> = ring.iter().map(|out| out.out_key).collect();

            inputs.push(TransactionInput::Key {
                amount: source.amount,
                output_indexes: absolute_output_offsets_to_relative(&absolute),
                key_image,
            });
            signing.push((key_image, ring_keys, input_secret, position));
        }

        let prefix = TransactionPrefix {
            version: CURRENT_TRANSACTION_VERSION,
            unlock_time: request.unlock_time,
            inputs,
            outputs,
            extra,
        };
        let prefix_hash = prefix.hash();
        let mut signatures = Vec::with_capacity(signing.len());
        for (key_image, ring_keys, secret, position) in &signing {
            let signature = crypto::generate_ring_signature(
                &prefix_hash,
                key_image,
                ring_keys,
                secret,
                *position,
                &mut rng,
            )
            .ok_or_else(|| WalletError::InternalError("ring signature failed".to_string()))?;
            signatures.push(signature);
        }
        let transaction = Transaction { prefix, signatures };

        let size = transaction.binary_size();
        if request.is_fusion {
            let input_amounts: Vec<Amount> = request.inputs.iter().map(|o| o.amount).collect();
            let output_amounts: Vec<Amount> =
                request.destinations.iter().map(|d| d.amount).collect();
            if !self
                .currency
                .is_fusion_transaction(&input_amounts, &output_amounts, size)
            {
                return Err(WalletError::NotFusionTransaction);
            }
        } else if size > self.currency.max_transaction_size_limit {
            return Err(WalletError::TransactionSizeTooBig {
                size,
                limit: self.currency.max_transaction_size_limit,
            });
        }

        let hash = transaction.hash();
        debug!(transaction = %hash, size, "transaction signed");
        Ok(PreparedTransaction {
            transaction,
            hash,
            secret_key: tx_key.secret_key,
            used_outputs: request.inputs.clone(),
            fee: request.fee,
            change: request.change,
            total_amount: request.total_amount,
        })
    }

    /// One-time secret and public key of an owned output
    fn input_secret(
        &self,
        source: &TransactionOutputInformation,
    ) -> WalletResult<(SecretKey, PublicKey)> {
        let output_key = source.output_key().ok_or_else(|| {
            WalletError::InvalidArgument("only key outputs can be spent".to_string())
        })?;
        let derivation = crypto::generate_key_derivation(
            &source.transaction_public_key,
            &self.keys.view_secret_key,
        )
        .ok_or_else(|| WalletError::InternalError("invalid transaction public key".to_string()))?;
        let secret = crypto::derive_secret_key(
            &derivation,
            source.output_in_transaction as usize,
            &self.keys.spend_secret_key,
        );
        if crypto::secret_key_to_public_key(&secret) != output_key {
            return Err(WalletError::InternalError(format!(
                "output {} of {} does not belong to the account",
                source.output_in_transaction, source.transaction_hash
            )));
        }
        Ok((secret, output_key))
    }

    pub async fn relay(&self, node: &dyn Node, prepared: &PreparedTransaction) -> WalletResult<()> {
        node.relay_transaction(&prepared.transaction).await?;
        info!(transaction = %prepared.hash, fee = prepared.fee, "transaction relayed");
        Ok(())
    }

    /// Decoys, signing and relay in one call
    pub async fn send(
        &self,
        node: &dyn Node,
        request: &SendRequest,
    ) -> WalletResult<PreparedTransaction> {
        let decoys = self.fetch_decoys(node, request).await?;
        let prepared = self.build_transaction(request, decoys)?;
        self.relay(node, &prepared).await?;
        Ok(prepared)
    }
}
