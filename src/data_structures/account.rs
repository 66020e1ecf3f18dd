//! Account keys and public addresses

use borsh::{BorshDeserialize, BorshSerialize};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    crypto,
    data_structures::types::{PublicKey, SecretKey},
    errors::{WalletError, WalletResult},
};

/// Public part of an account: spend and view public keys
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct AccountPublicAddress {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

/// Full account key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AccountKeys {
    pub address: AccountPublicAddress,
    pub spend_secret_key: SecretKey,
    pub view_secret_key: SecretKey,
}

impl AccountKeys {
    /// Generate a new random account
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let spend = crypto::generate_keys(rng);
        let view = crypto::generate_keys(rng);
        Self {
            address: AccountPublicAddress {
                spend_public_key: spend.public_key,
                view_public_key: view.public_key,
            },
            spend_secret_key: spend.secret_key.clone(),
            view_secret_key: view.secret_key.clone(),
        }
    }

    /// Rebuild an account from its two secret keys
    pub fn from_secret_keys(spend_secret_key: SecretKey, view_secret_key: SecretKey) -> Self {
        Self {
            address: AccountPublicAddress {
                spend_public_key: crypto::secret_key_to_public_key(&spend_secret_key),
                view_public_key: crypto::secret_key_to_public_key(&view_secret_key),
            },
            spend_secret_key,
            view_secret_key,
        }
    }

    /// Check that the public keys match the secret keys
    pub fn validate(&self) -> WalletResult<()> {
        if crypto::secret_key_to_public_key(&self.spend_secret_key) != self.address.spend_public_key
            || crypto::secret_key_to_public_key(&self.view_secret_key)
                != self.address.view_public_key
        {
            return Err(WalletError::KeyGenerationError(
                "public keys do not match secret keys".to_string(),
            ));
        }
        Ok(())
    }
}
