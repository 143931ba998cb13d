//! Cipher trait for swappable authenticated encryption backends.

use crate::error::CryptoError;

/// Output of an AEAD encryption with the IV and tag kept apart from the
/// ciphertext, matching how entries are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// Authenticated encryption with associated data (AEAD).
///
/// Implementations must draw a fresh random IV on every call to
/// [`encrypt`](Self::encrypt) and must never return plaintext from
/// [`decrypt`](Self::decrypt) unless the tag verifies.
pub trait Cipher: Send + Sync {
    /// Short algorithm name, used in logs.
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext` with `key`, binding `aad` into the tag.
    fn encrypt(
        &self,
        key: &[u8; 32],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<EncryptedPayload, CryptoError>;

    /// Decrypt a payload previously produced by [`encrypt`](Self::encrypt).
    fn decrypt(
        &self,
        key: &[u8; 32],
        payload: &EncryptedPayload,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}
