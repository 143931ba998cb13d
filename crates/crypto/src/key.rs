//! 256-bit encryption key with zero-on-drop semantics.

use {
    rand::RngCore,
    zeroize::{Zeroize, Zeroizing},
};

use crate::error::CryptoError;

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key.
///
/// Not `Clone`: a key has exactly one owner. The bytes are wiped when the key
/// is dropped or when [`clear`](Self::clear) is called.
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Generate a key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(bytes.as_mut());
        Self(bytes)
    }

    /// Copy key material from a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength { len: bytes.len() });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub(crate) fn from_zeroizing(bytes: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Zero the key bytes in place. The key is unusable afterwards.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }

    pub fn is_cleared(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(0)]
    #[case(16)]
    #[case(31)]
    #[case(33)]
    #[case(64)]
    fn rejects_wrong_lengths(#[case] len: usize) {
        let result = EncryptionKey::from_slice(&vec![7u8; len]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength { len: l }) if l == len));
    }

    #[test]
    fn accepts_32_bytes() {
        let key = EncryptionKey::from_slice(&[9u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[9u8; 32]);
    }

    #[test]
    fn generated_keys_differ() {
        let a = EncryptionKey::generate();
        let b = EncryptionKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn clear_wipes_in_place() {
        let mut key = EncryptionKey::from_slice(&[0xAB; 32]).unwrap();
        assert!(!key.is_cleared());
        key.clear();
        assert!(key.is_cleared());
    }

    #[test]
    fn debug_does_not_print_bytes() {
        let key = EncryptionKey::from_slice(&[0xAB; 32]).unwrap();
        let printed = format!("{key:?}");
        assert!(!printed.contains("171"));
        assert!(printed.contains("REDACTED"));
    }
}
