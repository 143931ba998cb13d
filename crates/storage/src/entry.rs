//! Stored record types.

use std::collections::{BTreeMap, BTreeSet};

use {
    chrono::{DateTime, SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
};

/// One encrypted value as it sits in storage and travels between replicas.
///
/// Byte fields serialize as standard base64 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub key: String,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub auth_tag: Vec<u8>,
    /// KDF salt, present when the entry was written under a password-derived key.
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1, bumped on every local write of this key.
    pub version: u64,
}

/// One persisted replication operation. The body is opaque to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub replica: String,
    pub seq: u64,
    pub body: String,
}

/// Entry upserts, entry deletes and journal records written as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub upserts: BTreeMap<String, VaultEntry>,
    pub deletes: BTreeSet<String>,
    pub journal: Vec<JournalRecord>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty() && self.journal.is_empty()
    }
}

/// ISO-8601 form used by the SQLite backend.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

mod b64 {
    use {
        base64::{Engine, engine::general_purpose::STANDARD},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use {
        base64::{Engine, engine::general_purpose::STANDARD},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| STANDARD.decode(raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sample(salt: Option<Vec<u8>>) -> VaultEntry {
        let now = Utc::now();
        VaultEntry {
            key: "k1".into(),
            ciphertext: vec![1, 2, 3],
            iv: vec![0; 12],
            auth_tag: vec![9; 16],
            salt,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let json = serde_json::to_value(sample(None)).unwrap();
        assert_eq!(json["ciphertext"], "AQID");
        assert!(json.get("salt").is_none());
    }

    #[test]
    fn json_preserves_every_field() {
        let entry = sample(Some(vec![7; 32]));
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: VaultEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let mut json = serde_json::to_value(sample(None)).unwrap();
        json["iv"] = serde_json::Value::String("not base64!".into());
        assert!(serde_json::from_value::<VaultEntry>(json).is_err());
    }

    #[test]
    fn timestamp_text_round_trip() {
        let now = Utc::now();
        let text = format_timestamp(&now);
        assert!(text.ends_with('Z'));
        assert_eq!(parse_timestamp(&text), Some(now));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
