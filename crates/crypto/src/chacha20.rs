//! ChaCha20-Poly1305 implementation of the [`Cipher`] trait.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use rand::RngCore;

use crate::{
    error::CryptoError,
    traits::{Cipher, EncryptedPayload},
};

/// IV size for ChaCha20-Poly1305 (96 bits).
pub const IV_LEN: usize = 12;

/// Poly1305 tag size.
pub const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 AEAD cipher (RFC 8439).
pub struct ChaCha20Poly1305Cipher;

impl Cipher for ChaCha20Poly1305Cipher {
    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }

    #[allow(deprecated)]
    fn encrypt(
        &self,
        key: &[u8; 32],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<EncryptedPayload, CryptoError> {
        let cipher = ChaCha20Poly1305::new(key.into());

        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        Ok(EncryptedPayload {
            ciphertext: buffer,
            iv: iv.to_vec(),
            auth_tag: tag.to_vec(),
        })
    }

    #[allow(deprecated)]
    fn decrypt(
        &self,
        key: &[u8; 32],
        payload: &EncryptedPayload,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        // A malformed IV or tag can never verify; report it the same way.
        if payload.iv.len() != IV_LEN || payload.auth_tag.len() != TAG_LEN {
            return Err(CryptoError::AuthenticationFailure);
        }

        let cipher = ChaCha20Poly1305::new(key.into());
        let mut buffer = payload.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&payload.iv),
                aad,
                &mut buffer,
                Tag::from_slice(&payload.auth_tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailure)?;
        Ok(buffer)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn round_trip_no_aad() {
        let cipher = ChaCha20Poly1305Cipher;
        let payload = cipher.encrypt(&KEY, b"hello vault", b"").unwrap();
        assert_eq!(cipher.decrypt(&KEY, &payload, b"").unwrap(), b"hello vault");
    }

    #[test]
    fn round_trip_with_aad() {
        let cipher = ChaCha20Poly1305Cipher;
        let payload = cipher.encrypt(&KEY, b"secret", b"entry:k1").unwrap();
        assert_eq!(
            cipher.decrypt(&KEY, &payload, b"entry:k1").unwrap(),
            b"secret"
        );
    }

    #[test]
    fn layout_lengths() {
        let cipher = ChaCha20Poly1305Cipher;
        let payload = cipher.encrypt(&KEY, b"twelve bytes", b"").unwrap();
        assert_eq!(payload.iv.len(), IV_LEN);
        assert_eq!(payload.auth_tag.len(), TAG_LEN);
        assert_eq!(payload.ciphertext.len(), b"twelve bytes".len());
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = ChaCha20Poly1305Cipher;
        let payload = cipher.encrypt(&KEY, b"secret", b"").unwrap();
        let result = cipher.decrypt(&[0x43; 32], &payload, b"");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn wrong_aad_fails() {
        let cipher = ChaCha20Poly1305Cipher;
        let payload = cipher.encrypt(&KEY, b"secret", b"entry:a").unwrap();
        let result = cipher.decrypt(&KEY, &payload, b"entry:b");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = ChaCha20Poly1305Cipher;
        let mut payload = cipher.encrypt(&KEY, b"secret", b"").unwrap();
        payload.ciphertext[0] ^= 0x01;
        let result = cipher.decrypt(&KEY, &payload, b"");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn tampered_tag_fails() {
        let cipher = ChaCha20Poly1305Cipher;
        let mut payload = cipher.encrypt(&KEY, b"secret", b"").unwrap();
        payload.auth_tag[TAG_LEN - 1] ^= 0x80;
        let result = cipher.decrypt(&KEY, &payload, b"");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn truncated_iv_fails_without_panic() {
        let cipher = ChaCha20Poly1305Cipher;
        let mut payload = cipher.encrypt(&KEY, b"secret", b"").unwrap();
        payload.iv.truncate(8);
        let result = cipher.decrypt(&KEY, &payload, b"");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let cipher = ChaCha20Poly1305Cipher;
        let a = cipher.encrypt(&KEY, b"same input", b"").unwrap();
        let b = cipher.encrypt(&KEY, b"same input", b"").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let cipher = ChaCha20Poly1305Cipher;
        let payload = cipher.encrypt(&KEY, b"", b"").unwrap();
        assert!(cipher.decrypt(&KEY, &payload, b"").unwrap().is_empty());
    }

    #[test]
    fn large_plaintext_round_trip() {
        let cipher = ChaCha20Poly1305Cipher;
        let plaintext = vec![0xAB; 100_000];
        let payload = cipher.encrypt(&KEY, &plaintext, b"").unwrap();
        assert_eq!(cipher.decrypt(&KEY, &payload, b"").unwrap(), plaintext);
    }
}
