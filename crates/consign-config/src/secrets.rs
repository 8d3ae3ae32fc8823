use anyhow::Result;
use consign_encrypt::{EncryptionConfig, SecretCipher};

/// Decrypt-on-read hook applied to secret settings.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, stored: &str) -> Result<String>;
}

/// Secrets are stored in clear text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSecrets;

impl SecretDecryptor for PlainSecrets {
    fn decrypt(&self, stored: &str) -> Result<String> {
        Ok(stored.to_string())
    }
}

/// Secrets sealed with the deployment passphrase. Values that do not look
/// encrypted pass through unchanged.
#[derive(Debug, Clone)]
pub struct PassphraseDecryptor {
    cipher: SecretCipher,
}

impl PassphraseDecryptor {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            cipher: SecretCipher::new(passphrase),
        }
    }

    /// Build from an [`EncryptionConfig`]; fails when no passphrase is
    /// configured.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        Ok(Self {
            cipher: SecretCipher::from_config(config)?,
        })
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }
}

impl SecretDecryptor for PassphraseDecryptor {
    fn decrypt(&self, stored: &str) -> Result<String> {
        self.cipher.reveal(stored)
    }
}
