use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::ArrayError;

/// The encryption type of an array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    /// No encryption.
    #[default]
    #[display("no_encryption")]
    NoEncryption,
    /// AES-256-GCM with a 32 byte key.
    #[serde(rename = "aes_256_gcm")]
    #[display("aes_256_gcm")]
    Aes256Gcm,
}

impl EncryptionType {
    /// The required key length in bytes.
    #[must_use]
    pub const fn key_length(self) -> usize {
        match self {
            Self::NoEncryption => 0,
            Self::Aes256Gcm => 32,
        }
    }
}

/// An opaque encryption key and its [`EncryptionType`].
///
/// The key material is never persisted.
/// Arrays store a checksum of the key so that opening with the wrong key fails with [`ArrayError::Encryption`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncryptionKey {
    encryption_type: EncryptionType,
    key: Vec<u8>,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("encryption_type", &self.encryption_type)
            .finish_non_exhaustive()
    }
}

impl EncryptionKey {
    /// No encryption.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a new encryption key.
    ///
    /// # Errors
    /// Returns [`ArrayError::Encryption`] if the key length does not match the encryption type.
    pub fn new(encryption_type: EncryptionType, key: impl Into<Vec<u8>>) -> Result<Self, ArrayError> {
        let key = key.into();
        if key.len() == encryption_type.key_length() {
            Ok(Self {
                encryption_type,
                key,
            })
        } else {
            Err(ArrayError::Encryption(format!(
                "{encryption_type} requires a key of {} bytes, got {}",
                encryption_type.key_length(),
                key.len()
            )))
        }
    }

    /// An AES-256-GCM key.
    ///
    /// # Errors
    /// Returns [`ArrayError::Encryption`] if `key` is not 32 bytes.
    pub fn aes_256_gcm(key: impl Into<Vec<u8>>) -> Result<Self, ArrayError> {
        Self::new(EncryptionType::Aes256Gcm, key)
    }

    /// The encryption type.
    #[must_use]
    pub const fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    /// The key check value persisted with the array schema.
    pub(crate) fn check_value(&self) -> Option<u32> {
        match self.encryption_type {
            EncryptionType::NoEncryption => None,
            EncryptionType::Aes256Gcm => Some(crc32c::crc32c(&self.key)),
        }
    }

    /// Verify this key against the persisted encryption type and key check value.
    pub(crate) fn verify(
        &self,
        encryption_type: EncryptionType,
        check_value: Option<u32>,
    ) -> Result<(), ArrayError> {
        if self.encryption_type != encryption_type {
            return Err(ArrayError::Encryption(format!(
                "the array is encrypted with {encryption_type}, but the key is for {}",
                self.encryption_type
            )));
        }
        if self.check_value() != check_value {
            return Err(ArrayError::Encryption(
                "the encryption key does not match the array".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_key() {
        assert!(EncryptionKey::aes_256_gcm(vec![0u8; 16]).is_err());
        let key = EncryptionKey::aes_256_gcm(vec![7u8; 32]).unwrap();
        assert_eq!(key.encryption_type(), EncryptionType::Aes256Gcm);
        assert!(!format!("{key:?}").contains('7'));

        let check = key.check_value();
        assert!(key.verify(EncryptionType::Aes256Gcm, check).is_ok());
        let other = EncryptionKey::aes_256_gcm(vec![8u8; 32]).unwrap();
        assert!(matches!(
            other.verify(EncryptionType::Aes256Gcm, check),
            Err(ArrayError::Encryption(_))
        ));
        assert!(matches!(
            EncryptionKey::none().verify(EncryptionType::Aes256Gcm, check),
            Err(ArrayError::Encryption(_))
        ));
        assert!(EncryptionKey::none()
            .verify(EncryptionType::NoEncryption, None)
            .is_ok());
    }
}
