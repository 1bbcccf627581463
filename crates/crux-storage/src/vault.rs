//! AES-256-GCM encryption of stored board credentials.
//!
//! Encoded form is `hex(iv):hex(auth_tag):hex(ciphertext)` with a 16-byte IV,
//! so values written by earlier deployments remain readable.

use std::fmt;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::RngCore;
use thiserror::Error;

pub const KEY_ENV: &str = "BOARD_CREDENTIALS_KEY";

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

type Cipher = AesGcm<Aes256, U16>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("BOARD_CREDENTIALS_KEY is not set")]
    MissingKey,
    #[error("credential key must be 64 hex characters")]
    InvalidKey,
    #[error("credential encryption failed")]
    Encrypt,
    #[error("stored credential failed its integrity check")]
    Tampered,
}

#[derive(Clone)]
pub struct CredentialVault {
    cipher: Cipher,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Cipher::new(GenericArray::from_slice(key)),
        }
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| VaultError::InvalidKey)?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| VaultError::InvalidKey)?;
        Ok(Self::new(&key))
    }

    /// Load the process-wide key; absence is a startup error for callers.
    pub fn from_env() -> Result<Self, VaultError> {
        let hex_key = std::env::var(KEY_ENV).map_err(|_| VaultError::MissingKey)?;
        Self::from_hex(&hex_key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let mut parts = encoded.split(':');
        let (Some(iv), Some(tag), Some(ciphertext), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::Tampered);
        };

        let iv = hex::decode(iv).map_err(|_| VaultError::Tampered)?;
        let tag = hex::decode(tag).map_err(|_| VaultError::Tampered)?;
        let mut sealed = hex::decode(ciphertext).map_err(|_| VaultError::Tampered)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(VaultError::Tampered);
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(&iv), sealed.as_slice())
            .map_err(|_| VaultError::Tampered)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Tampered)
    }
}
