//! Carrier credential encryption using AES-256-GCM with PBKDF2 key derivation.
//!
//! Carrier passwords, API keys and client secrets are stored encrypted in the
//! configuration backend and decrypted on read. Stored values use the format
//! `base64(salt || nonce || ciphertext || auth_tag)`.
//!
//! ## Usage
//!
//! ```
//! use consign_encrypt::{SecretCipher, encrypt};
//!
//! let stored = String::from_utf8(encrypt(b"api-key", "passphrase").unwrap()).unwrap();
//! let cipher = SecretCipher::new("passphrase");
//!
//! assert_eq!(cipher.reveal(&stored).unwrap(), "api-key");
//! // Values that were never encrypted pass through untouched.
//! assert_eq!(cipher.reveal("plain-value").unwrap(), "plain-value");
//! ```

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac_array;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Size of the salt for key derivation (16 bytes)
const SALT_SIZE: usize = 16;
/// Size of the nonce for AES-GCM (12 bytes)
const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag
const TAG_SIZE: usize = 16;
/// Number of PBKDF2 iterations
const PBKDF2_ITERATIONS: u32 = 100_000;
/// Size of the derived key (256 bits for AES-256)
const KEY_SIZE: usize = 32;

/// Environment variable holding the credential passphrase by default
pub const DEFAULT_PASSPHRASE_ENV: &str = "CONSIGN_SECRET_KEY";

/// Where the credential passphrase comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Passphrase given directly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Environment variable name to read the passphrase from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl EncryptionConfig {
    /// Create a config with an explicit passphrase
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
            env_var: None,
        }
    }

    /// Create a config that reads the passphrase from an environment variable
    pub fn from_env(env_var: impl Into<String>) -> Self {
        Self {
            passphrase: None,
            env_var: Some(env_var.into()),
        }
    }

    /// Resolve the passphrase. The environment variable wins when it is set.
    pub fn passphrase(&self) -> Option<String> {
        if let Some(env_var) = &self.env_var
            && let Ok(value) = std::env::var(env_var)
            && !value.trim().is_empty()
        {
            return Some(value);
        }

        self.passphrase.clone()
    }
}

/// Encrypt data using AES-256-GCM with PBKDF2 key derivation
///
/// Returns base64-encoded `salt || nonce || ciphertext`.
pub fn encrypt(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key).context("failed to create AES-256-GCM cipher")?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| anyhow::anyhow!("encryption failed: {:?}", e))?;

    let mut result = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result).into_bytes())
}

/// Decrypt data produced by [`encrypt`]
pub fn decrypt(encrypted_data: impl AsRef<str>, passphrase: &str) -> Result<Vec<u8>> {
    let data = BASE64
        .decode(encrypted_data.as_ref().trim())
        .context("invalid base64 encoding")?;

    if data.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
        bail!("encrypted data too short");
    }

    let salt = &data[..SALT_SIZE];
    let nonce_bytes = &data[SALT_SIZE..SALT_SIZE + NONCE_SIZE];
    let ciphertext = &data[SALT_SIZE + NONCE_SIZE..];

    let key = derive_key(passphrase, salt);

    let cipher = Aes256Gcm::new_from_slice(&key).context("failed to create AES-256-GCM cipher")?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).map_err(|e| {
        anyhow::anyhow!(
            "decryption failed - wrong passphrase or corrupted data: {:?}",
            e
        )
    })
}

/// Derive a 256-bit key from passphrase using PBKDF2-SHA256
fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS)
}

/// Heuristic: does this value look like output of [`encrypt`]?
///
/// Short plain values and anything that is not base64 are treated as
/// plain text.
pub fn is_encrypted(content: &str) -> bool {
    let Ok(data) = BASE64.decode(content.trim()) else {
        return false;
    };

    data.len() >= SALT_SIZE + NONCE_SIZE + TAG_SIZE
}

/// Credential cipher bound to one passphrase.
#[derive(Clone)]
pub struct SecretCipher {
    passphrase: String,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl SecretCipher {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    /// Build a cipher from config, failing when no passphrase is available.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        let passphrase = config.passphrase().context(
            "no credential passphrase available. Set CONSIGN_SECRET_KEY or provide a passphrase in config.",
        )?;
        Ok(Self::new(passphrase))
    }

    /// Encrypt a credential for storage.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let encrypted = encrypt(plaintext.as_bytes(), &self.passphrase)?;
        String::from_utf8(encrypted).context("encrypted data is not valid UTF-8")
    }

    /// Decrypt a stored credential.
    ///
    /// Values that do not look encrypted are returned as-is so deployments
    /// can migrate credentials one at a time. A value that looks encrypted but
    /// fails authentication is an error.
    pub fn reveal(&self, stored: &str) -> Result<String> {
        if !is_encrypted(stored) {
            return Ok(stored.to_string());
        }

        let plaintext = decrypt(stored, &self.passphrase)?;
        String::from_utf8(plaintext).context("decrypted credential is not valid UTF-8")
    }
}
