//! Binary delta envelope.
//!
//! Layout: one format-version byte followed by a JSON body
//! `{"ops": [Operation, ...]}`. The version byte lets a future encoding be
//! rejected cleanly instead of being misparsed.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{ReplicaError, Result, ops::Operation};

pub const DELTA_FORMAT_VERSION: u8 = 1;

/// Opaque encoded set of operations, safe to send over any byte transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta(Vec<u8>);

#[derive(Serialize)]
struct BodyRef<'a, V> {
    ops: &'a [&'a Operation<V>],
}

#[derive(Deserialize)]
struct Body<V> {
    ops: Vec<Operation<V>>,
}

impl Delta {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn encode<V: Serialize>(ops: &[&Operation<V>]) -> Result<Self> {
        let mut bytes = vec![DELTA_FORMAT_VERSION];
        serde_json::to_writer(&mut bytes, &BodyRef { ops })?;
        Ok(Self(bytes))
    }

    pub(crate) fn decode<V: DeserializeOwned>(&self) -> Result<Vec<Operation<V>>> {
        let (version, body) = self
            .0
            .split_first()
            .ok_or_else(|| ReplicaError::malformed("empty delta"))?;
        if *version != DELTA_FORMAT_VERSION {
            return Err(ReplicaError::malformed(format!(
                "unsupported delta format version {version}"
            )));
        }
        let body: Body<V> = serde_json::from_slice(body)
            .map_err(|e| ReplicaError::malformed(format!("undecodable body: {e}")))?;
        Ok(body.ops)
    }
}

impl From<Vec<u8>> for Delta {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Delta {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::ops::OpKind, rstest::rstest};

    #[test]
    fn starts_with_version_byte() {
        let op = Operation {
            replica: "r".into(),
            seq: 1,
            lamport: 1,
            key: "k".into(),
            op: OpKind::Insert("v".to_string()),
        };
        let delta = Delta::encode(&[&op]).unwrap();
        assert_eq!(delta.as_bytes()[0], DELTA_FORMAT_VERSION);
        assert_eq!(delta.decode::<String>().unwrap(), vec![op]);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::wrong_version(b"\x02{\"ops\":[]}".to_vec())]
    #[case::not_json(b"\x01not json".to_vec())]
    #[case::wrong_shape(b"\x01{\"operations\":[]}".to_vec())]
    fn rejects_bad_input(#[case] bytes: Vec<u8>) {
        let err = Delta::from_bytes(bytes).decode::<String>().unwrap_err();
        assert!(matches!(err, ReplicaError::MalformedDelta { .. }), "{err}");
    }
}
