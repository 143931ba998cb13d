//! Crypto error types.

/// Errors produced by key handling, key derivation and AEAD operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key material was not exactly 32 bytes.
    #[error("invalid key length: {len} bytes (expected 32)")]
    InvalidKeyLength { len: usize },

    /// The authentication tag did not verify (wrong key or tampered data).
    #[error("authentication failed: wrong key or tampered data")]
    AuthenticationFailure,

    /// The KDF salt is too short to be accepted by Argon2.
    #[error("invalid salt length: {len} bytes (minimum 8)")]
    InvalidSalt { len: usize },

    /// Key derivation failed (bad parameters).
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// Encryption itself failed; only reachable with oversized inputs.
    #[error("encryption failed: {0}")]
    Encrypt(String),
}
