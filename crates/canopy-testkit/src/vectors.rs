//! Golden wire vectors.
//!
//! Each vector pins the exact bytes of one message whose payload contains
//! no tree blob, so the bytes do not depend on the tree codec.

use canopy_core::{frame, limits, CborCodec, ErrorCode, Message, NetworkId};
use serde::Serialize;

/// A golden test vector.
#[derive(Debug, Clone, Serialize)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// The message.
    #[serde(skip)]
    pub message: Message,
    /// Expected encoding, header included (hex).
    pub expected_hex: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "version 1",
            message: Message::Version { version: 1 },
            expected_hex: "010101",
        },
        GoldenVector {
            name: "heartbeat ping",
            message: Message::Heartbeat { reply: false },
            expected_hex: "030100",
        },
        GoldenVector {
            name: "heartbeat reply",
            message: Message::Heartbeat { reply: true },
            expected_hex: "030101",
        },
        GoldenVector {
            name: "bind request",
            message: Message::BindRequest {
                correlation: 1,
                query: "/a".to_string(),
                limit: 5,
            },
            // type, len 10, corr 1, "/a", limit 5
            expected_hex: "040a00000001000000022f6100000005",
        },
        GoldenVector {
            name: "unbind request",
            message: Message::UnbindRequest {
                correlation: 7,
                net_id: NetworkId::new(42),
            },
            expected_hex: "060800000007000000000000002a",
        },
        GoldenVector {
            name: "unbind response",
            message: Message::UnbindResponse { correlation: 7 },
            expected_hex: "070000000007",
        },
        GoldenVector {
            name: "sync request",
            message: Message::SyncRequest {
                correlation: 0x0102_0304,
                net_id: NetworkId::new(9),
            },
            expected_hex: "0808010203040000000000000009",
        },
        GoldenVector {
            name: "remove child",
            message: Message::RemoveChild {
                child: NetworkId::new(5),
            },
            expected_hex: "0b080000000000000005",
        },
        GoldenVector {
            name: "change attribute",
            message: Message::ChangeAttribute {
                net_id: NetworkId::new(1),
                name: "id".to_string(),
                value: "x".to_string(),
            },
            expected_hex: "0c1300000000000000010000000269640000000178",
        },
        GoldenVector {
            name: "clear attribute",
            message: Message::ClearAttribute {
                net_id: NetworkId::new(1),
                name: "id".to_string(),
            },
            expected_hex: "0d0e0000000000000001000000026964",
        },
        GoldenVector {
            name: "change dirty",
            message: Message::ChangeDirty {
                net_id: NetworkId::new(3),
                dirty: true,
            },
            expected_hex: "0e09000000000000000301",
        },
        GoldenVector {
            name: "connection error",
            message: Message::Error {
                correlation: 0,
                code: ErrorCode::VersionMismatch,
                message: "v".to_string(),
                context: String::new(),
            },
            expected_hex: "020d0000000000000001000000017600000000",
        },
    ]
}

/// Encode every vector and decode it back. Returns the names of vectors
/// that failed either way.
pub fn verify_all_vectors() -> Vec<&'static str> {
    let codec = CborCodec::new();
    all_vectors()
        .into_iter()
        .filter(|vector| {
            let Ok(encoded) = vector.message.encode(&codec) else {
                return true;
            };
            if hex::encode(&encoded) != vector.expected_hex {
                return true;
            }
            let decoded = frame(&encoded, limits::DEFAULT_MAX_FRAME_LEN)
                .ok()
                .flatten()
                .and_then(|f| Message::decode(&f, &encoded, &codec).ok());
            decoded.as_ref() != Some(&vector.message)
        })
        .map(|vector| vector.name)
        .collect()
}

/// Every vector as JSON, for other implementations.
pub fn vectors_json() -> String {
    serde_json::to_string_pretty(&all_vectors()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_verify() {
        assert_eq!(verify_all_vectors(), Vec::<&str>::new());
    }

    #[test]
    fn test_vector_names_unique() {
        let mut names: Vec<_> = all_vectors().iter().map(|v| v.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all_vectors().len());
    }

    #[test]
    fn test_json_export() {
        let json = vectors_json();
        assert!(json.contains("\"expected_hex\": \"010101\""));
    }
}
