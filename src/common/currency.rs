//! Currency parameters used by the wallet core
//!
//! The wallet never hard-codes economic constants; everything numeric that a
//! currency may tune (dust threshold, unlock windows, fusion limits) lives in
//! [`Currency`] and is handed to components at construction time.

use serde::{Deserialize, Serialize};

use crate::{
    common::{read_varint, write_varint},
    crypto::fast_hash,
    data_structures::{account::AccountPublicAddress, types::PublicKey, Amount},
    errors::{WalletError, WalletResult},
};

const ADDRESS_CHECKSUM_SIZE: usize = 4;

/// Currency parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Varint prefix of public addresses
    pub public_address_base58_prefix: u64,
    /// Number of decimal places used when formatting amounts
    pub number_of_decimal_places: u32,
    /// Smallest fee accepted for ordinary transactions
    pub minimum_fee: Amount,
    /// Outputs below this amount are dust
    pub default_dust_threshold: Amount,
    /// Blocks before a coinbase output becomes spendable
    pub mined_money_unlock_window: u32,
    /// Blocks before an ordinary output becomes spendable
    pub transaction_spendable_age: u32,
    /// Allowed height slack when checking height-based unlock times
    pub locked_tx_allowed_delta_blocks: u64,
    /// Allowed time slack when checking timestamp-based unlock times
    pub locked_tx_allowed_delta_seconds: u64,
    /// Unlock times below this value are heights, above it timestamps
    pub max_block_number: u64,
    /// Largest accepted mixin
    pub max_mixin: u64,
    /// Largest transaction blob size accepted by the sender
    pub max_transaction_size_limit: usize,
    /// Largest fusion transaction blob size
    pub fusion_tx_max_size: usize,
    /// Fewest inputs a fusion transaction may have
    pub fusion_tx_min_input_count: usize,
    /// Minimum inputs / outputs ratio of a fusion transaction
    pub fusion_tx_min_in_out_count_ratio: usize,
}

impl Default for Currency {
    fn default() -> Self {
        Self {
            public_address_base58_prefix: 6,
            number_of_decimal_places: 8,
            minimum_fee: 10,
            default_dust_threshold: 10,
            mined_money_unlock_window: 60,
            transaction_spendable_age: 10,
            locked_tx_allowed_delta_blocks: 1,
            locked_tx_allowed_delta_seconds: 120,
            max_block_number: 500_000_000,
            max_mixin: 100,
            max_transaction_size_limit: 100_000,
            fusion_tx_max_size: 30_000,
            fusion_tx_min_input_count: 12,
            fusion_tx_min_in_out_count_ratio: 4,
        }
    }
}

impl Currency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address_prefix(mut self, prefix: u64) -> Self {
        self.public_address_base58_prefix = prefix;
        self
    }

    pub fn with_minimum_fee(mut self, fee: Amount) -> Self {
        self.minimum_fee = fee;
        self
    }

    pub fn with_dust_threshold(mut self, threshold: Amount) -> Self {
        self.default_dust_threshold = threshold;
        self
    }

    pub fn with_mined_money_unlock_window(mut self, blocks: u32) -> Self {
        self.mined_money_unlock_window = blocks;
        self
    }

    pub fn with_transaction_spendable_age(mut self, blocks: u32) -> Self {
        self.transaction_spendable_age = blocks;
        self
    }

    pub fn with_max_mixin(mut self, max_mixin: u64) -> Self {
        self.max_mixin = max_mixin;
        self
    }

    pub fn with_fusion_limits(
        mut self,
        max_size: usize,
        min_input_count: usize,
        min_in_out_count_ratio: usize,
    ) -> Self {
        self.fusion_tx_max_size = max_size;
        self.fusion_tx_min_input_count = min_input_count;
        self.fusion_tx_min_in_out_count_ratio = min_in_out_count_ratio;
        self
    }

    // === Addresses ===

    /// Encode an address as base58(prefix || spend key || view key || checksum)
    pub fn account_address_as_string(&self, address: &AccountPublicAddress) -> String {
        let mut data = Vec::with_capacity(80);
        write_varint(&mut data, self.public_address_base58_prefix);
        data.extend_from_slice(address.spend_public_key.as_bytes());
        data.extend_from_slice(address.view_public_key.as_bytes());
        let checksum = fast_hash(&data);
        data.extend_from_slice(&checksum.as_bytes()[..ADDRESS_CHECKSUM_SIZE]);
        bs58::encode(data).into_string()
    }

    /// Parse an address produced by [`Currency::account_address_as_string`]
    pub fn parse_account_address_string(&self, address: &str) -> WalletResult<AccountPublicAddress> {
        let bad = || WalletError::BadAddress(address.to_string());
        let data = bs58::decode(address).into_vec().map_err(|_| bad())?;
        if data.len() < ADDRESS_CHECKSUM_SIZE {
            return Err(bad());
        }
        let (body, checksum) = data.split_at(data.len() - ADDRESS_CHECKSUM_SIZE);
        if &fast_hash(body).as_bytes()[..ADDRESS_CHECKSUM_SIZE] != checksum {
            return Err(bad());
        }
        let (prefix, consumed) = read_varint(body).ok_or_else(bad)?;
        if prefix != self.public_address_base58_prefix {
            return Err(bad());
        }
        let keys = &body[consumed..];
        if keys.len() != 64 {
            return Err(bad());
        }
        let mut spend = [0u8; 32];
        let mut view = [0u8; 32];
        spend.copy_from_slice(&keys[..32]);
        view.copy_from_slice(&keys[32..]);
        let address = AccountPublicAddress {
            spend_public_key: PublicKey::new(spend),
            view_public_key: PublicKey::new(view),
        };
        if !crate::crypto::check_key(&address.spend_public_key)
            || !crate::crypto::check_key(&address.view_public_key)
        {
            return Err(bad());
        }
        Ok(address)
    }

    // === Amounts ===

    pub fn format_amount(&self, amount: Amount) -> String {
        let divisor = 10u64.pow(self.number_of_decimal_places);
        format!(
            "{}.{:0width$}",
            amount / divisor,
            amount % divisor,
            width = self.number_of_decimal_places as usize
        )
    }

    pub fn parse_amount(&self, text: &str) -> Option<Amount> {
        let text = text.trim();
        let (whole, fraction) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        let places = self.number_of_decimal_places as usize;
        if fraction.len() > places || (whole.is_empty() && fraction.is_empty()) {
            return None;
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut fraction_digits = fraction.to_string();
        while fraction_digits.len() < places {
            fraction_digits.push('0');
        }
        let fraction: u64 = if fraction_digits.is_empty() {
            0
        } else {
            fraction_digits.parse().ok()?
        };
        whole
            .checked_mul(10u64.pow(self.number_of_decimal_places))?
            .checked_add(fraction)
    }

    // === Fusion ===

    /// Whether `amount` may be used as a fusion input below `threshold`.
    /// Returns the power of ten of the amount when it may.
    pub fn is_amount_applicable_in_fusion_transaction_input(
        &self,
        amount: Amount,
        threshold: Amount,
    ) -> Option<u8> {
        if amount >= threshold || amount < self.default_dust_threshold {
            return None;
        }
        pretty_amount_power(amount)
    }

    /// Checks the fusion transaction shape rules against input/output amounts and blob size
    pub fn is_fusion_transaction(
        &self,
        input_amounts: &[Amount],
        output_amounts: &[Amount],
        size: usize,
    ) -> bool {
        if size > self.fusion_tx_max_size {
            return false;
        }
        if input_amounts.len() < self.fusion_tx_min_input_count {
            return false;
        }
        if input_amounts.len() < output_amounts.len() * self.fusion_tx_min_in_out_count_ratio {
            return false;
        }
        let mut input_amount: Amount = 0;
        for amount in input_amounts {
            if *amount < self.default_dust_threshold {
                return false;
            }
            input_amount = match input_amount.checked_add(*amount) {
                Some(total) => total,
                None => return false,
            };
        }
        let (mut expected, dust) =
            decompose_amount_into_digits(input_amount, self.default_dust_threshold);
        if dust > 0 {
            expected.push(dust);
        }
        expected.sort_unstable();
        let mut outputs = output_amounts.to_vec();
        outputs.sort_unstable();
        expected == outputs
    }
}

/// Splits `amount` into `digit * 10^k` chunks, smallest first. Low-order chunks
/// that fit under `dust_threshold` are accumulated into the returned dust value.
pub fn decompose_amount_into_digits(amount: Amount, dust_threshold: Amount) -> (Vec<Amount>, Amount) {
    let mut chunks = Vec::new();
    let mut dust: Amount = 0;
    let mut is_dust_handled = false;
    let mut remaining = amount;
    let mut order: Amount = 1;
    while remaining != 0 {
        let chunk = (remaining % 10) * order;
        remaining /= 10;
        order = order.saturating_mul(10);
        if !is_dust_handled && dust + chunk <= dust_threshold {
            dust += chunk;
        } else {
            is_dust_handled = true;
            if chunk != 0 {
                chunks.push(chunk);
            }
        }
    }
    (chunks, dust)
}

/// Power of ten of a `digit * 10^k` amount, `None` for other amounts
pub fn pretty_amount_power(amount: Amount) -> Option<u8> {
    if amount == 0 {
        return None;
    }
    let mut value = amount;
    let mut power = 0u8;
    while value % 10 == 0 {
        value /= 10;
        power += 1;
    }
    (value < 10).then_some(power)
}
