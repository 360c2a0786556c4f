//! Session payload encoding and change hashing.
//!
//! Payload layout:
//! ```text
//! [u32 big-endian hash length][hash bytes][JSON session body]
//! ```
//! The hash is SHA-256 over the JSON of the attribute map. Attribute maps
//! are ordered by name, so equal contents always hash the same.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CodecError;
use crate::session::Session;
use crate::value::TypeRegistry;

/// Metadata stored in front of every session payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Hash of the attribute set at the time of the write.
    pub attributes_hash: Vec<u8>,
}

impl SessionMetadata {
    pub fn new(attributes_hash: Vec<u8>) -> Self {
        Self { attributes_hash }
    }
}

#[derive(Serialize)]
struct TypedValueRef<'a> {
    #[serde(rename = "type")]
    type_name: &'a str,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct TypedValue {
    #[serde(rename = "type")]
    type_name: String,
    value: serde_json::Value,
}

#[derive(Serialize)]
struct SessionBodyRef<'a> {
    id: &'a str,
    creation_time: DateTime<Utc>,
    last_accessed_time: DateTime<Utc>,
    max_inactive_secs: u64,
    is_new: bool,
    valid: bool,
    principal: Option<&'a str>,
    attributes: BTreeMap<&'a str, TypedValueRef<'a>>,
}

#[derive(Deserialize)]
struct SessionBody {
    id: String,
    creation_time: DateTime<Utc>,
    last_accessed_time: DateTime<Utc>,
    max_inactive_secs: u64,
    is_new: bool,
    valid: bool,
    principal: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, TypedValue>,
}

/// Encodes sessions to bytes and back.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    registry: Arc<TypeRegistry>,
}

impl Default for SessionCodec {
    fn default() -> Self {
        Self::new(TypeRegistry::with_defaults())
    }
}

impl SessionCodec {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Content hash of the session's attributes.
    pub fn hash(&self, session: &Session) -> Result<Vec<u8>, CodecError> {
        let attributes = typed_attributes(session)?;
        let bytes = serde_json::to_vec(&attributes)?;
        Ok(Sha256::digest(&bytes).to_vec())
    }

    /// Serialize `session` behind `metadata`.
    pub fn encode(&self, session: &Session, metadata: &SessionMetadata) -> Result<Vec<u8>, CodecError> {
        let body = SessionBodyRef {
            id: session.id(),
            creation_time: session.creation_time(),
            last_accessed_time: session.last_accessed_time(),
            max_inactive_secs: session.max_inactive_secs(),
            is_new: session.is_new(),
            valid: session.is_valid(),
            principal: session.principal(),
            attributes: typed_attributes(session)?,
        };
        let body = serde_json::to_vec(&body)?;

        let hash_len = u32::try_from(metadata.attributes_hash.len())
            .map_err(|_| CodecError::CorruptPayload("attribute hash too large".to_string()))?;

        let mut out = Vec::with_capacity(4 + metadata.attributes_hash.len() + body.len());
        out.extend_from_slice(&hash_len.to_be_bytes());
        out.extend_from_slice(&metadata.attributes_hash);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse a payload produced by [`encode`](Self::encode).
    pub fn decode(&self, bytes: &[u8]) -> Result<(Session, SessionMetadata), CodecError> {
        let (len_bytes, rest) = bytes
            .split_first_chunk::<4>()
            .ok_or_else(|| CodecError::CorruptPayload("payload shorter than header".to_string()))?;
        let hash_len = u32::from_be_bytes(*len_bytes) as usize;
        if rest.len() < hash_len {
            return Err(CodecError::CorruptPayload(format!(
                "hash length {hash_len} exceeds payload size {}",
                rest.len()
            )));
        }
        let (hash, body) = rest.split_at(hash_len);

        let body: SessionBody = serde_json::from_slice(body)
            .map_err(|e| CodecError::CorruptPayload(format!("invalid session body: {e}")))?;

        let mut attributes = BTreeMap::new();
        for (name, typed) in body.attributes {
            let value = self.registry.decode(&name, &typed.type_name, typed.value)?;
            attributes.insert(name, value);
        }

        let session = Session::from_parts(
            body.id,
            body.creation_time,
            body.last_accessed_time,
            body.max_inactive_secs,
            body.is_new,
            body.valid,
            body.principal,
            attributes,
        );
        Ok((session, SessionMetadata::new(hash.to_vec())))
    }
}

fn typed_attributes(session: &Session) -> Result<BTreeMap<&str, TypedValueRef<'_>>, CodecError> {
    session
        .attributes()
        .iter()
        .map(|(name, value)| -> Result<_, CodecError> {
            value
                .check_encodable()
                .map_err(|reason| CodecError::Unencodable {
                    name: name.clone(),
                    reason,
                })?;
            Ok((
                name.as_str(),
                TypedValueRef {
                    type_name: value.type_name(),
                    value: value.to_json()?,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        let mut session = Session::new("ABC123", 1800);
        session.set_attribute("user", "alice".to_string());
        session.set_attribute("visits", 3i64);
        session.set_attribute("roles", vec!["admin".to_string(), "ops".to_string()]);
        session.set_principal(Some("alice".to_string()));
        session
    }

    #[test]
    fn test_encode_decode() {
        let codec = SessionCodec::default();
        let session = sample();
        let metadata = SessionMetadata::new(codec.hash(&session).unwrap());

        let bytes = codec.encode(&session, &metadata).unwrap();
        assert_eq!(&bytes[..4], &32u32.to_be_bytes());

        let (decoded, decoded_meta) = codec.decode(&bytes).unwrap();
        assert_eq!(decoded_meta, metadata);
        assert_eq!(decoded.id(), "ABC123");
        assert_eq!(decoded.principal(), Some("alice"));
        assert_eq!(decoded.attribute::<String>("user").map(String::as_str), Some("alice"));
        assert_eq!(decoded.attribute::<i64>("visits"), Some(&3));
        assert_eq!(decoded.creation_time(), session.creation_time());
        assert!(!decoded.is_dirty());
        assert_eq!(codec.hash(&decoded).unwrap(), metadata.attributes_hash);
    }

    #[test]
    fn test_hash_tracks_content() {
        let codec = SessionCodec::default();
        let mut session = sample();
        let before = codec.hash(&session).unwrap();
        assert_eq!(before.len(), 32);

        session.set_attribute("visits", 3i64);
        assert_eq!(codec.hash(&session).unwrap(), before);

        session.set_attribute("visits", 4i64);
        assert_ne!(codec.hash(&session).unwrap(), before);
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let codec = SessionCodec::default();
        let mut a = Session::new("A", 60);
        a.set_attribute("x", 1i64);
        a.set_attribute("y", 2i64);
        let mut b = Session::new("B", 60);
        b.set_attribute("y", 2i64);
        b.set_attribute("x", 1i64);
        assert_eq!(codec.hash(&a).unwrap(), codec.hash(&b).unwrap());
    }

    #[test]
    fn test_truncated_payload() {
        let codec = SessionCodec::default();
        assert!(matches!(codec.decode(b"nu"), Err(CodecError::CorruptPayload(_))));
        assert!(matches!(
            codec.decode(&[0, 0, 0, 64, 1, 2]),
            Err(CodecError::CorruptPayload(_))
        ));
        assert!(matches!(
            codec.decode(&[0, 0, 0, 0, b'{']),
            Err(CodecError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let codec = SessionCodec::default();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut session = sample();
            session.set_attribute("ratio", bad);
            assert!(matches!(
                codec.hash(&session),
                Err(CodecError::Unencodable { ref name, .. }) if name == "ratio"
            ));
            assert!(matches!(
                codec.encode(&session, &SessionMetadata::default()),
                Err(CodecError::Unencodable { .. })
            ));
        }

        let mut session = sample();
        session.set_attribute("ratio", 0.25f64);
        let bytes = codec.encode(&session, &SessionMetadata::default()).unwrap();
        let (decoded, _) = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.attribute::<f64>("ratio"), Some(&0.25));
    }

    #[test]
    fn test_unregistered_type_rejected() {
        let codec = SessionCodec::default();
        let bytes = codec
            .encode(&sample(), &SessionMetadata::default())
            .unwrap();

        let strict = SessionCodec::new(TypeRegistry::new());
        assert!(matches!(
            strict.decode(&bytes),
            Err(CodecError::UnknownAttributeType { .. })
        ));
    }
}
