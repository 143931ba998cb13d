//! Vault state machine: key installation, encrypted reads and writes, destroy.

use std::collections::BTreeMap;

use {
    base64::Engine,
    cairn_crypto::{
        ChaCha20Poly1305Cipher, Cipher, EncryptedPayload, EncryptionKey, KdfParams, kdf,
    },
    cairn_storage::{EntryStore, StorageBackend, VaultEntry, WriteBatch},
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
    zeroize::Zeroizing,
};

use crate::error::{Result, VaultError};

pub(crate) const META_KDF_SALT: &str = "kdf_salt";
pub(crate) const META_KDF_PARAMS: &str = "kdf_params";
pub(crate) const META_KEY_CHECK: &str = "key_check";

const KEY_CHECK_PLAINTEXT: &[u8] = b"cairn key check v1";
const KEY_CHECK_AAD: &[u8] = b"meta:key_check";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Where the vault is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultStatus {
    /// No key installed yet.
    Uninitialized,
    /// Key in memory; reads and writes allowed.
    Initialized,
    /// Terminal. The key has been zeroed and the backend closed.
    Destroyed,
}

/// Plaintext view of a stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<T> {
    pub key: String,
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl<T> Item<T> {
    pub(crate) fn from_entry(entry: VaultEntry, value: T) -> Self {
        Self {
            key: entry.key,
            value,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            version: entry.version,
        }
    }
}

enum KeyState {
    Uninitialized,
    Ready {
        key: EncryptionKey,
        /// Salt of a password-derived key, recorded on every entry.
        salt: Option<Vec<u8>>,
    },
    Destroyed,
}

impl KeyState {
    fn ready(&self) -> Result<(&EncryptionKey, Option<&[u8]>)> {
        match self {
            Self::Ready { key, salt } => Ok((key, salt.as_deref())),
            Self::Uninitialized => Err(VaultError::NotInitialized),
            Self::Destroyed => Err(VaultError::Destroyed),
        }
    }

    fn ensure_uninitialized(&self) -> Result<()> {
        match self {
            Self::Uninitialized => Ok(()),
            Self::Ready { .. } => Err(VaultError::AlreadyInitialized),
            Self::Destroyed => Err(VaultError::Destroyed),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct KeyCheck {
    iv: String,
    ciphertext: String,
    auth_tag: String,
}

/// Associated data binding an entry's ciphertext to its key, so a ciphertext
/// moved under another key fails authentication.
fn entry_aad(key: &str) -> Vec<u8> {
    format!("entry:{key}").into_bytes()
}

fn payload_of(entry: &VaultEntry) -> EncryptedPayload {
    EncryptedPayload {
        ciphertext: entry.ciphertext.clone(),
        iv: entry.iv.clone(),
        auth_tag: entry.auth_tag.clone(),
    }
}

/// A named, encrypted key-value collection on top of one storage namespace.
///
/// Generic over [`Cipher`] but defaults to [`ChaCha20Poly1305Cipher`]. The key
/// lives behind a `RwLock`; writes are additionally serialized so version
/// numbers never collide.
pub struct EncryptedVault<C: Cipher = ChaCha20Poly1305Cipher> {
    name: String,
    storage: StorageBackend,
    cipher: C,
    kdf: KdfParams,
    state: RwLock<KeyState>,
    writes: Mutex<()>,
}

impl EncryptedVault<ChaCha20Poly1305Cipher> {
    /// Create an uninitialized vault with the default cipher.
    pub fn new(name: impl Into<String>, storage: StorageBackend) -> Self {
        Self::with_cipher(name, storage, ChaCha20Poly1305Cipher)
    }
}

impl<C: Cipher> EncryptedVault<C> {
    pub fn with_cipher(name: impl Into<String>, storage: StorageBackend, cipher: C) -> Self {
        Self {
            name: name.into(),
            storage,
            cipher,
            kdf: KdfParams::default(),
            state: RwLock::new(KeyState::Uninitialized),
            writes: Mutex::new(()),
        }
    }

    /// Argon2 cost used when this vault derives a key for a fresh namespace.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    pub async fn status(&self) -> VaultStatus {
        match *self.state.read().await {
            KeyState::Uninitialized => VaultStatus::Uninitialized,
            KeyState::Ready { .. } => VaultStatus::Initialized,
            KeyState::Destroyed => VaultStatus::Destroyed,
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.status().await == VaultStatus::Initialized
    }

    /// Salt of the installed password-derived key. Other devices derive the
    /// same key from the same password only with this salt.
    pub async fn kdf_salt(&self) -> Result<Option<Vec<u8>>> {
        let state = self.state.read().await;
        let (_, salt) = state.ready()?;
        Ok(salt.map(<[u8]>::to_vec))
    }

    /// Install a fresh random key.
    pub async fn init_with_random_key(&self) -> Result<()> {
        self.install(EncryptionKey::generate(), None).await
    }

    /// Install caller-provided key material (exactly 32 bytes).
    pub async fn init_with_key(&self, bytes: &[u8]) -> Result<()> {
        let key = EncryptionKey::from_slice(bytes)?;
        self.install(key, None).await
    }

    /// Derive the key from `password` with Argon2id and install it.
    ///
    /// Without an explicit `salt` the salt stored for this namespace is reused,
    /// or a new one is generated and stored. Returns the salt used.
    pub async fn init_with_password(
        &self,
        password: &SecretString,
        salt: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.state.read().await.ensure_uninitialized()?;

        let stored_salt = match self.storage.get_meta(META_KDF_SALT).await? {
            Some(b64) => Some(B64.decode(b64)?),
            None => None,
        };
        let params = match self.storage.get_meta(META_KDF_PARAMS).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => self.kdf.clone(),
        };
        let salt = salt.map(<[u8]>::to_vec).or(stored_salt.clone());

        let (key, salt) = kdf::derive_key(
            password.expose_secret().as_bytes(),
            salt.as_deref(),
            &params,
        )?;

        if stored_salt.is_none() {
            self.storage
                .set_meta(META_KDF_SALT, &B64.encode(&salt))
                .await?;
            self.storage
                .set_meta(META_KDF_PARAMS, &serde_json::to_string(&params)?)
                .await?;
        }

        self.install(key, Some(salt.clone())).await?;
        Ok(salt)
    }

    async fn install(&self, key: EncryptionKey, salt: Option<Vec<u8>>) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_uninitialized()?;
        self.verify_key(&key).await?;
        *state = KeyState::Ready { key, salt };

        info!(
            vault = %self.name,
            backend = self.storage.kind(),
            cipher = self.cipher.name(),
            "vault initialized"
        );
        Ok(())
    }

    /// Check `key` against the namespace's key-check blob, creating the blob on
    /// first use.
    async fn verify_key(&self, key: &EncryptionKey) -> Result<()> {
        match self.storage.get_meta(META_KEY_CHECK).await? {
            Some(json) => {
                let check: KeyCheck = serde_json::from_str(&json)?;
                let payload = EncryptedPayload {
                    ciphertext: B64.decode(check.ciphertext)?,
                    iv: B64.decode(check.iv)?,
                    auth_tag: B64.decode(check.auth_tag)?,
                };
                let plaintext = self
                    .cipher
                    .decrypt(key.as_bytes(), &payload, KEY_CHECK_AAD)
                    .inspect_err(|_| warn!(vault = %self.name, "key check failed"))?;
                if plaintext != KEY_CHECK_PLAINTEXT {
                    return Err(VaultError::AuthenticationFailure);
                }
            },
            None => {
                let payload =
                    self.cipher
                        .encrypt(key.as_bytes(), KEY_CHECK_PLAINTEXT, KEY_CHECK_AAD)?;
                let check = KeyCheck {
                    iv: B64.encode(&payload.iv),
                    ciphertext: B64.encode(&payload.ciphertext),
                    auth_tag: B64.encode(&payload.auth_tag),
                };
                self.storage
                    .set_meta(META_KEY_CHECK, &serde_json::to_string(&check)?)
                    .await?;
            },
        }
        Ok(())
    }

    /// Encrypt and store `value` under `key`.
    pub async fn put<T: Serialize>(&self, key: &str, value: T) -> Result<Item<T>> {
        let _write = self.writes.lock().await;
        let entry = self.seal(key, &value).await?;
        self.storage.put(key, &entry).await?;
        self.record_put(&entry);
        Ok(Item::from_entry(entry, value))
    }

    /// Encrypt `value` into the entry that would replace the one under `key`.
    /// Nothing is written.
    pub(crate) async fn seal<T: Serialize>(&self, key: &str, value: &T) -> Result<VaultEntry> {
        if key.is_empty() {
            return Err(VaultError::EmptyKey);
        }
        let state = self.state.read().await;
        let (enc_key, salt) = state.ready()?;

        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        let payload = self
            .cipher
            .encrypt(enc_key.as_bytes(), &plaintext, &entry_aad(key))?;

        let now = Utc::now();
        let previous = self.storage.get(key).await?;
        Ok(VaultEntry {
            key: key.to_string(),
            ciphertext: payload.ciphertext,
            iv: payload.iv,
            auth_tag: payload.auth_tag,
            salt: salt.map(<[u8]>::to_vec),
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
            version: previous.as_ref().map_or(1, |p| p.version + 1),
        })
    }

    pub(crate) fn record_put(&self, entry: &VaultEntry) {
        debug!(vault = %self.name, key = %entry.key, version = entry.version, "entry written");
        #[cfg(feature = "metrics")]
        cairn_metrics::counter!(cairn_metrics::vault::PUTS_TOTAL).increment(1);
    }

    /// Persist entries, deletions and journal records in one storage write.
    pub(crate) async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let _write = self.writes.lock().await;
        self.state.read().await.ready()?;
        self.storage.write_batch(batch).await?;
        Ok(())
    }

    /// Decrypt and deserialize the value under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get_item(key).await?.map(|item| item.value))
    }

    /// Like [`get`](Self::get) but with the entry's metadata.
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Item<T>>> {
        let state = self.state.read().await;
        let (enc_key, _) = state.ready()?;
        let Some(entry) = self.storage.get(key).await? else {
            return Ok(None);
        };
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(enc_key.as_bytes(), &payload_of(&entry), &entry_aad(key))
                .inspect_err(|e| {
                    warn!(vault = %self.name, key, error = %e, "decrypt failed");
                    #[cfg(feature = "metrics")]
                    cairn_metrics::counter!(cairn_metrics::vault::DECRYPT_FAILURES_TOTAL)
                        .increment(1);
                })?,
        );
        let value = serde_json::from_slice(&plaintext)?;
        Ok(Some(Item::from_entry(entry, value)))
    }

    /// Remove `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let _write = self.writes.lock().await;
        self.state.read().await.ready()?;
        let existed = self.storage.delete(key).await?;
        debug!(vault = %self.name, key, existed, "entry deleted");
        Ok(existed)
    }

    /// Stored keys in ascending order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.state.read().await.ready()?;
        Ok(self.storage.keys().await?.into_iter().collect())
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        self.state.read().await.ready()?;
        Ok(self.storage.has(key).await?)
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<()> {
        let _write = self.writes.lock().await;
        self.state.read().await.ready()?;
        self.storage.clear().await?;
        info!(vault = %self.name, "vault cleared");
        Ok(())
    }

    /// The raw encrypted entry under `key`.
    pub async fn entry(&self, key: &str) -> Result<Option<VaultEntry>> {
        self.state.read().await.ready()?;
        Ok(self.storage.get(key).await?)
    }

    /// Every encrypted entry, as stored. Nothing is decrypted.
    pub async fn export(&self) -> Result<BTreeMap<String, VaultEntry>> {
        self.state.read().await.ready()?;
        Ok(self.storage.get_all().await?)
    }

    /// Store encrypted entries verbatim. Nothing is re-encrypted and versions
    /// are kept as given.
    pub async fn import(&self, entries: &BTreeMap<String, VaultEntry>) -> Result<()> {
        let _write = self.writes.lock().await;
        self.state.read().await.ready()?;
        self.storage.import_all(entries).await?;
        debug!(vault = %self.name, count = entries.len(), "entries imported");
        Ok(())
    }

    /// Zero the key and close the backend. The vault is unusable afterwards.
    pub async fn destroy(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, KeyState::Destroyed) {
            KeyState::Destroyed => return Err(VaultError::Destroyed),
            KeyState::Ready { mut key, .. } => key.clear(),
            KeyState::Uninitialized => {},
        }
        drop(state);
        self.storage.close().await;
        info!(vault = %self.name, "vault destroyed");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    fn vault() -> EncryptedVault {
        EncryptedVault::new("test", StorageBackend::memory("test"))
            .with_kdf_params(KdfParams::insecure_fast())
    }

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string())
    }

    async fn ready_vault() -> EncryptedVault {
        let v = vault();
        v.init_with_random_key().await.unwrap();
        v
    }

    #[tokio::test]
    async fn status_transitions() {
        let v = vault();
        assert_eq!(v.status().await, VaultStatus::Uninitialized);
        v.init_with_random_key().await.unwrap();
        assert_eq!(v.status().await, VaultStatus::Initialized);
        v.destroy().await.unwrap();
        assert_eq!(v.status().await, VaultStatus::Destroyed);
    }

    #[tokio::test]
    async fn operations_before_init_fail() {
        let v = vault();
        assert!(matches!(
            v.put("k", 1).await,
            Err(VaultError::NotInitialized)
        ));
        assert!(matches!(
            v.get::<i32>("k").await,
            Err(VaultError::NotInitialized)
        ));
        assert!(matches!(v.keys().await, Err(VaultError::NotInitialized)));
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let v = ready_vault().await;
        assert!(matches!(
            v.init_with_random_key().await,
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn everything_after_destroy_fails() {
        let v = ready_vault().await;
        v.put("k", "v").await.unwrap();
        v.destroy().await.unwrap();
        assert!(matches!(v.get::<String>("k").await, Err(VaultError::Destroyed)));
        assert!(matches!(v.put("k", "v").await, Err(VaultError::Destroyed)));
        assert!(matches!(
            v.init_with_random_key().await,
            Err(VaultError::Destroyed)
        ));
        assert!(matches!(v.destroy().await, Err(VaultError::Destroyed)));
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let v = ready_vault().await;
        let value = json!({"user": "ada", "tags": ["a", "b"], "n": 3});
        let item = v.put("profile", value.clone()).await.unwrap();
        assert_eq!(item.version, 1);
        assert_eq!(item.value, value);
        assert_eq!(
            v.get::<serde_json::Value>("profile").await.unwrap(),
            Some(value)
        );
        assert_eq!(v.get::<serde_json::Value>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stored_bytes_are_not_plaintext() {
        let v = ready_vault().await;
        v.put("k", "very secret text").await.unwrap();
        let entry = v.entry("k").await.unwrap().unwrap();
        let stored = String::from_utf8_lossy(&entry.ciphertext);
        assert!(!stored.contains("very secret text"));
        assert_eq!(entry.iv.len(), 12);
        assert_eq!(entry.auth_tag.len(), 16);
        assert_eq!(entry.salt, None);
    }

    #[tokio::test]
    async fn version_increments_and_created_at_is_kept() {
        let v = ready_vault().await;
        let first = v.put("k", 1).await.unwrap();
        let second = v.put("k", 2).await.unwrap();
        assert_eq!(second.version, first.version + 1);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let fresh_ivs = v.entry("k").await.unwrap().unwrap().iv;
        v.put("k", 2).await.unwrap();
        assert_ne!(v.entry("k").await.unwrap().unwrap().iv, fresh_ivs);
    }

    #[tokio::test]
    async fn delete_keys_has_clear() {
        let v = ready_vault().await;
        for k in ["b", "a", "c"] {
            v.put(k, k).await.unwrap();
        }
        assert_eq!(v.keys().await.unwrap(), vec!["a", "b", "c"]);
        assert!(v.delete("b").await.unwrap());
        assert!(!v.delete("b").await.unwrap());
        assert!(!v.has("b").await.unwrap());
        assert!(v.has("a").await.unwrap());
        v.clear().await.unwrap();
        assert!(v.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let v = ready_vault().await;
        assert!(matches!(v.put("", 1).await, Err(VaultError::EmptyKey)));
    }

    #[rstest]
    #[case::short(16)]
    #[case::long(33)]
    #[case::empty(0)]
    #[tokio::test]
    async fn raw_key_must_be_32_bytes(#[case] len: usize) {
        let v = vault();
        let err = v.init_with_key(&vec![7; len]).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidKeyLength { len: l } if l == len));
        assert_eq!(v.status().await, VaultStatus::Uninitialized);
    }

    #[tokio::test]
    async fn export_import_moves_ciphertext_verbatim() {
        let key = [9u8; 32];
        let a = vault();
        a.init_with_key(&key).await.unwrap();
        a.put("x", "hello").await.unwrap();
        a.put("x", "hello again").await.unwrap();
        let exported = a.export().await.unwrap();

        let b = vault();
        b.init_with_key(&key).await.unwrap();
        b.import(&exported).await.unwrap();
        assert_eq!(b.export().await.unwrap(), exported);
        assert_eq!(b.entry("x").await.unwrap().unwrap().version, 2);
        assert_eq!(
            b.get::<String>("x").await.unwrap().as_deref(),
            Some("hello again")
        );
    }

    #[tokio::test]
    async fn wrong_key_is_authentication_failure() {
        let a = ready_vault().await;
        a.put("x", 1).await.unwrap();
        let exported = a.export().await.unwrap();

        let b = ready_vault().await;
        b.import(&exported).await.unwrap();
        assert!(matches!(
            b.get::<i32>("x").await,
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn ciphertext_is_bound_to_its_key() {
        let v = ready_vault().await;
        v.put("a", "for a").await.unwrap();
        let mut moved = v.entry("a").await.unwrap().unwrap();
        moved.key = "b".into();
        v.import(&BTreeMap::from([("b".to_string(), moved)]))
            .await
            .unwrap();
        assert!(matches!(
            v.get::<String>("b").await,
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails() {
        let v = ready_vault().await;
        v.put("k", "data").await.unwrap();
        let mut entry = v.entry("k").await.unwrap().unwrap();
        entry.ciphertext[0] ^= 0xff;
        v.import(&BTreeMap::from([("k".to_string(), entry)]))
            .await
            .unwrap();
        assert!(matches!(
            v.get::<String>("k").await,
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn password_salt_is_stored_and_reused() {
        let storage = StorageBackend::memory("pw");
        let v = EncryptedVault::new("pw", storage).with_kdf_params(KdfParams::insecure_fast());
        let salt = v.init_with_password(&secret("hunter2"), None).await.unwrap();
        assert_eq!(salt.len(), kdf::SALT_LEN);
        v.put("k", "v").await.unwrap();
        assert_eq!(v.entry("k").await.unwrap().unwrap().salt, Some(salt.clone()));

        assert_eq!(v.kdf_salt().await.unwrap(), Some(salt.clone()));
        let stored = v.storage().get_meta(META_KDF_SALT).await.unwrap().unwrap();
        assert_eq!(B64.decode(stored).unwrap(), salt);
    }

    #[tokio::test]
    async fn key_check_rejects_a_different_key_on_the_same_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaults.db");

        let first = EncryptedVault::new("v", StorageBackend::sqlite_file(&path, "v").await.unwrap())
            .with_kdf_params(KdfParams::insecure_fast());
        first.init_with_password(&secret("right"), None).await.unwrap();
        first.put("k", "v").await.unwrap();
        first.destroy().await.unwrap();

        let wrong = EncryptedVault::new("v", StorageBackend::sqlite_file(&path, "v").await.unwrap())
            .with_kdf_params(KdfParams::insecure_fast());
        assert!(matches!(
            wrong.init_with_password(&secret("wrong"), None).await,
            Err(VaultError::AuthenticationFailure)
        ));
        assert_eq!(wrong.status().await, VaultStatus::Uninitialized);

        let right = EncryptedVault::new("v", StorageBackend::sqlite_file(&path, "v").await.unwrap())
            .with_kdf_params(KdfParams::insecure_fast());
        right.init_with_password(&secret("right"), None).await.unwrap();
        assert_eq!(right.get::<String>("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn destroy_zeroes_and_closes() {
        let v = ready_vault().await;
        v.destroy().await.unwrap();
        assert!(matches!(v.keys().await, Err(VaultError::Destroyed)));
    }
}
