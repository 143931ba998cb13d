//! Argon2id key derivation for password → key.

use {argon2::Argon2, rand::RngCore, zeroize::Zeroizing};

use crate::{
    error::CryptoError,
    key::{EncryptionKey, KEY_LEN},
};

/// Length of salts generated by [`generate_salt`].
pub const SALT_LEN: usize = 32;

/// Argon2 refuses salts shorter than this.
const MIN_SALT_LEN: usize = 8;

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 64 MiB = 65536).
    pub m_cost: u32,
    /// Number of passes (default: 3).
    pub t_cost: u32,
    /// Degree of parallelism (default: 1).
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use these for real data.
    pub fn insecure_fast() -> Self {
        Self {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// Generate a random 32-byte salt.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from `password`.
///
/// When `salt` is `None` a fresh [`SALT_LEN`]-byte salt is generated. The salt
/// actually used is returned so the caller can store it next to the data.
pub fn derive_key(
    password: &[u8],
    salt: Option<&[u8]>,
    params: &KdfParams,
) -> Result<(EncryptionKey, Vec<u8>), CryptoError> {
    let salt = match salt {
        Some(s) if s.len() < MIN_SALT_LEN => {
            return Err(CryptoError::InvalidSalt { len: s.len() });
        },
        Some(s) => s.to_vec(),
        None => generate_salt(),
    };

    let argon2_params =
        argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
            .map_err(|e| CryptoError::Kdf(format!("invalid KDF params: {e}")))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password, &salt, output.as_mut())
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    Ok((EncryptionKey::from_zeroizing(output), salt))
}
