//! Password-encrypted wallet file
//!
//! Layout: `magic(8) | version u32 LE | salt(16) | nonce(24) | ciphertext`.
//! The ciphertext is a borsh [`WalletSnapshot`] sealed with XChaCha20-Poly1305
//! under a key derived from the password with Argon2id.

use std::io::{Read, Write};

use argon2::{Algorithm, Argon2, Params, Version};
use borsh::{BorshDeserialize, BorshSerialize};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    data_structures::account::AccountKeys,
    errors::{WalletError, WalletResult},
    scanning::{subscription::SynchronizationStart, synchronizer::SynchronizerState},
    storage::transfers_container::TransfersContainerState,
    wallet::transactions_cache::TransactionsCacheState,
};

pub const WALLET_FILE_MAGIC: &[u8; 8] = b"CNWALLET";
pub const WALLET_FILE_VERSION: u32 = 1;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;
const KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = 8 + 4 + SALT_SIZE + NONCE_SIZE;

// Argon2id cost
const KDF_MEMORY_KIB: u32 = 19 * 1024;
const KDF_ITERATIONS: u32 = 1;
const KDF_PARALLELISM: u32 = 1;

/// Chain position and owned outputs
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WalletDetails {
    pub synchronizer: SynchronizerState,
    pub container: TransfersContainerState,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WalletSnapshot {
    pub keys: AccountKeys,
    pub sync_start: SynchronizationStart,
    /// Absent when saved without details; synchronization then restarts
    pub details: Option<WalletDetails>,
    pub cache: Option<TransactionsCacheState>,
}

pub struct WalletSerializer;

impl WalletSerializer {
    pub fn save<W: Write>(
        writer: &mut W,
        password: &str,
        snapshot: &WalletSnapshot,
    ) -> WalletResult<()> {
        let plaintext = Zeroizing::new(
            borsh::to_vec(snapshot).map_err(|e| WalletError::SerializationError(e.to_string()))?,
        );
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = cipher_for(password, &salt)?;
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| WalletError::InternalError("wallet encryption failed".to_string()))?;

        writer.write_all(WALLET_FILE_MAGIC)?;
        writer.write_all(&WALLET_FILE_VERSION.to_le_bytes())?;
        writer.write_all(&salt)?;
        writer.write_all(&nonce)?;
        writer.write_all(&ciphertext)?;
        writer.flush()?;
        debug!(
            bytes = HEADER_SIZE + ciphertext.len(),
            detailed = snapshot.details.is_some(),
            cache = snapshot.cache.is_some(),
            "wallet saved"
        );
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R, password: &str) -> WalletResult<WalletSnapshot> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if data.len() < HEADER_SIZE || &data[..8] != WALLET_FILE_MAGIC {
            return Err(WalletError::SerializationError(
                "not a wallet file".to_string(),
            ));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&data[8..12]);
        let version = u32::from_le_bytes(version);
        if version != WALLET_FILE_VERSION {
            return Err(WalletError::SerializationError(format!(
                "unsupported wallet file version {version}"
            )));
        }
        let salt = &data[12..12 + SALT_SIZE];
        let nonce = &data[12 + SALT_SIZE..HEADER_SIZE];

        let cipher = cipher_for(password, salt)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(nonce), &data[HEADER_SIZE..])
                .map_err(|_| WalletError::WrongPassword)?,
        );
        WalletSnapshot::try_from_slice(&plaintext)
            .map_err(|e| WalletError::SerializationError(e.to_string()))
    }
}

fn cipher_for(password: &str, salt: &[u8]) -> WalletResult<XChaCha20Poly1305> {
    let params = Params::new(
        KDF_MEMORY_KIB,
        KDF_ITERATIONS,
        KDF_PARALLELISM,
        Some(KEY_SIZE),
    )
    .map_err(|e| WalletError::KeyGenerationError(e.to_string()))?;
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| WalletError::KeyGenerationError(e.to_string()))?;
    Ok(XChaCha20Poly1305::new(Key::from_slice(key.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> WalletSnapshot {
        WalletSnapshot {
            keys: AccountKeys::generate(&mut rand::thread_rng()),
            sync_start: SynchronizationStart {
                height: 3,
                timestamp: 1000,
            },
            details: Some(WalletDetails {
                synchronizer: SynchronizerState::default(),
                container: TransfersContainerState::default(),
            }),
            cache: None,
        }
    }

    #[test]
    fn encrypted_round_trip() {
        let snapshot = snapshot();
        let mut file = Vec::new();
        WalletSerializer::save(&mut file, "secret", &snapshot).unwrap();
        assert_eq!(&file[..8], WALLET_FILE_MAGIC);

        let loaded = WalletSerializer::load(&mut file.as_slice(), "secret").unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let mut file = Vec::new();
        WalletSerializer::save(&mut file, "secret", &snapshot()).unwrap();
        assert_eq!(
            WalletSerializer::load(&mut file.as_slice(), "guess"),
            Err(WalletError::WrongPassword)
        );
    }

    #[test]
    fn garbage_is_not_a_wallet() {
        assert!(matches!(
            WalletSerializer::load(&mut &b"hello"[..], "secret"),
            Err(WalletError::SerializationError(_))
        ));

        let mut file = Vec::new();
        WalletSerializer::save(&mut file, "secret", &snapshot()).unwrap();
        file[8] = 9;
        assert!(matches!(
            WalletSerializer::load(&mut file.as_slice(), "secret"),
            Err(WalletError::SerializationError(_))
        ));
    }
}
