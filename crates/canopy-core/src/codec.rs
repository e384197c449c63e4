//! Tree codec: the boundary between fragments and opaque byte blobs.
//!
//! Protocol code never inspects encoded trees. It hands a [`Fragment`] to a
//! [`TreeCodec`] and writes the resulting bytes as a length-prefixed blob.
//! Each session owns its codec instance.
//!
//! The bundled [`CborCodec`] encodes a fragment as a CBOR map with small
//! integer keys:
//!
//! ```text
//! { 0: net_id | null, 1: type, 2: [[name, value], ...], 3: [children], 4: flags }
//! ```
//!
//! `flags` bit 0 is the stub marker, bit 1 the dirty flag.

use ciborium::value::{Integer, Value};

use crate::error::{CoreError, Result};
use crate::fragment::Fragment;
use crate::types::NetworkId;

/// Serialize/deserialize tree fragments to bytes.
pub trait TreeCodec: Send + Sync {
    /// Encode a fragment to bytes.
    fn encode(&self, fragment: &Fragment) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`TreeCodec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Fragment>;
}

/// Fragment map keys. Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const NET_ID: u64 = 0;
    pub const TYPE: u64 = 1;
    pub const ATTRIBUTES: u64 = 2;
    pub const CHILDREN: u64 = 3;
    pub const FLAGS: u64 = 4;
}

const FLAG_STUB: u64 = 0x01;
const FLAG_DIRTY: u64 = 0x02;

/// Nesting allowed while decoding. Each tree level costs two CBOR levels.
const RECURSION_LIMIT: usize = 4096;

/// CBOR codec for fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl CborCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl TreeCodec for CborCodec {
    fn encode(&self, fragment: &Fragment) -> Result<Vec<u8>> {
        let value = fragment_to_value(fragment);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&value, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Fragment> {
        let value: Value = ciborium::de::from_reader_with_recursion_limit(bytes, RECURSION_LIMIT)
            .map_err(|e| CoreError::DecodingError(e.to_string()))?;
        value_to_fragment(value)
    }
}

/// Convert a fragment to a CBOR value (map with integer keys).
fn fragment_to_value(fragment: &Fragment) -> Value {
    let mut entries = Vec::with_capacity(5);

    let net_id = match fragment.net_id {
        Some(id) => Value::Integer(id.get().into()),
        None => Value::Null,
    };
    entries.push((Value::Integer(keys::NET_ID.into()), net_id));

    entries.push((
        Value::Integer(keys::TYPE.into()),
        Value::Text(fragment.type_name.clone()),
    ));

    let attributes = fragment
        .attributes
        .iter()
        .map(|(name, value)| Value::Array(vec![Value::Text(name.clone()), Value::Text(value.clone())]))
        .collect();
    entries.push((Value::Integer(keys::ATTRIBUTES.into()), Value::Array(attributes)));

    let children = fragment.children.iter().map(fragment_to_value).collect();
    entries.push((Value::Integer(keys::CHILDREN.into()), Value::Array(children)));

    let mut flags = 0u64;
    if fragment.stub {
        flags |= FLAG_STUB;
    }
    if fragment.dirty {
        flags |= FLAG_DIRTY;
    }
    entries.push((Value::Integer(keys::FLAGS.into()), Value::Integer(flags.into())));

    Value::Map(entries)
}

/// Convert a CBOR value back to a fragment, validating its shape.
fn value_to_fragment(value: Value) -> Result<Fragment> {
    let entries = match value {
        Value::Map(entries) => entries,
        other => return Err(decode_err(format!("expected map, got {:?}", other))),
    };

    let mut fragment = Fragment::default();
    let mut saw_type = false;

    for (key, value) in entries {
        let key = match key {
            Value::Integer(i) => integer_to_u64(i)?,
            other => return Err(decode_err(format!("expected integer key, got {:?}", other))),
        };

        match key {
            keys::NET_ID => {
                fragment.net_id = match value {
                    Value::Null => None,
                    Value::Integer(i) => Some(NetworkId::new(integer_to_u64(i)?)),
                    other => return Err(decode_err(format!("bad net_id: {:?}", other))),
                };
            }
            keys::TYPE => {
                fragment.type_name = expect_text(value)?;
                saw_type = true;
            }
            keys::ATTRIBUTES => {
                for pair in expect_array(value)? {
                    let mut pair = expect_array(pair)?.into_iter();
                    let (Some(name), Some(value), None) = (pair.next(), pair.next(), pair.next())
                    else {
                        return Err(decode_err("attribute must be a [name, value] pair"));
                    };
                    fragment.attributes.push((expect_text(name)?, expect_text(value)?));
                }
            }
            keys::CHILDREN => {
                for child in expect_array(value)? {
                    fragment.children.push(value_to_fragment(child)?);
                }
            }
            keys::FLAGS => {
                let flags = match value {
                    Value::Integer(i) => integer_to_u64(i)?,
                    other => return Err(decode_err(format!("bad flags: {:?}", other))),
                };
                fragment.stub = flags & FLAG_STUB != 0;
                fragment.dirty = flags & FLAG_DIRTY != 0;
            }
            unknown => return Err(decode_err(format!("unknown fragment key {}", unknown))),
        }
    }

    if !saw_type {
        return Err(decode_err("fragment without type name"));
    }
    if fragment.dirty && !fragment.children.is_empty() {
        return Err(decode_err("dirty fragment carries children"));
    }

    Ok(fragment)
}

fn integer_to_u64(i: Integer) -> Result<u64> {
    u64::try_from(i).map_err(|_| decode_err("integer out of range"))
}

fn expect_text(value: Value) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(decode_err(format!("expected text, got {:?}", other))),
    }
}

fn expect_array(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(decode_err(format!("expected array, got {:?}", other))),
    }
}

fn decode_err(msg: impl Into<String>) -> CoreError {
    CoreError::DecodingError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_preserves_structure() {
        let fragment = Fragment::new("config")
            .with_net_id(NetworkId::new(7))
            .attr("name", "main")
            .attr("mode", "fast")
            .child(Fragment::new("item").with_net_id(NetworkId::new(8)).stubbed(true));

        let codec = CborCodec::new();
        let bytes = codec.encode(&fragment).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded, fragment);
        assert!(decoded.children[0].stub);
        assert!(decoded.children[0].dirty);
    }

    #[test]
    fn test_codec_deterministic() {
        let fragment = Fragment::new("a").attr("x", "1").child(Fragment::new("b"));
        let codec = CborCodec::new();
        assert_eq!(codec.encode(&fragment).unwrap(), codec.encode(&fragment).unwrap());
    }

    #[test]
    fn test_codec_rejects_garbage() {
        let codec = CborCodec::new();
        assert!(codec.decode(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn test_codec_rejects_missing_type() {
        let value = Value::Map(vec![(
            Value::Integer(keys::FLAGS.into()),
            Value::Integer(0u64.into()),
        )]);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&value, &mut buf).unwrap();

        let err = CborCodec::new().decode(&buf).unwrap_err();
        assert!(matches!(err, CoreError::DecodingError(_)));
    }

    #[test]
    fn test_codec_deep_tree() {
        let mut fragment = Fragment::new("leaf");
        for _ in 0..200 {
            fragment = Fragment::new("level").child(fragment);
        }
        let codec = CborCodec::new();
        let bytes = codec.encode(&fragment).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 201);
    }
}
