//! Symmetric encryption for vault entries.
//!
//! Entries are sealed with ChaCha20-Poly1305 under a 256-bit key that is either
//! random or derived from a password via Argon2id. The [`Cipher`] trait keeps
//! the AEAD backend swappable; the free functions below use the default one.

pub mod chacha20;
pub mod error;
pub mod kdf;
pub mod key;
pub mod traits;

pub use {
    chacha20::ChaCha20Poly1305Cipher,
    error::CryptoError,
    kdf::{KdfParams, derive_key},
    key::{EncryptionKey, KEY_LEN},
    traits::{Cipher, EncryptedPayload},
};

/// Generate a fresh random 256-bit key.
pub fn generate_key() -> EncryptionKey {
    EncryptionKey::generate()
}

/// Encrypt `plaintext` with the default cipher and no associated data.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<EncryptedPayload, CryptoError> {
    ChaCha20Poly1305Cipher.encrypt(key.as_bytes(), plaintext, b"")
}

/// Decrypt a payload produced by [`encrypt`].
pub fn decrypt(payload: &EncryptedPayload, key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305Cipher.decrypt(key.as_bytes(), payload, b"")
}

/// Overwrite the key's backing bytes with zeros.
pub fn clear_key(key: &mut EncryptionKey) {
    key.clear();
}
