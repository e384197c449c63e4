//! Wire framing: message types and the variable-length header.
//!
//! Every message on the stream starts with a header:
//!
//! - 1 byte type tag. The high bit (`0x80`) selects the long length form.
//! - Length of the payload, excluding the header: 1 byte when the payload
//!   is shorter than [`SHORT_LENGTH_LIMIT`], otherwise 4 bytes.
//! - A 4-byte correlation id, only for [`MessageType::is_correlated`] types.
//!
//! All multi-byte integers are big-endian. A message is dispatched only once
//! its full payload is present in the receive buffer; [`frame`] never
//! consumes anything, so a partial read simply waits for more bytes.

use bytes::BufMut;

use crate::error::{CoreError, Result};

/// Current protocol version, exchanged in the `Version` message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Payloads below this length use the 1-byte length form.
pub const SHORT_LENGTH_LIMIT: usize = 128;

/// Type byte flag announcing a 4-byte length.
const LONG_FLAG: u8 = 0x80;

/// Size limits.
pub mod limits {
    /// Default maximum payload length accepted by a connection (16 MiB).
    pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
    /// Largest possible header: type + 4-byte length + correlation id.
    pub const MAX_HEADER_LEN: usize = 9;
}

/// Protocol message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Version = 1,
    Error = 2,
    Heartbeat = 3,
    BindRequest = 4,
    BindResponse = 5,
    UnbindRequest = 6,
    UnbindResponse = 7,
    SyncRequest = 8,
    SyncResponse = 9,
    AddChild = 10,
    RemoveChild = 11,
    ChangeAttribute = 12,
    ClearAttribute = 13,
    ChangeDirty = 14,
    QueryRequest = 15,
    QueryResponse = 16,
    ExecuteRequest = 17,
    ExecuteResponse = 18,
}

impl MessageType {
    /// Convert from the low 7 bits of the type byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Version),
            2 => Some(Self::Error),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::BindRequest),
            5 => Some(Self::BindResponse),
            6 => Some(Self::UnbindRequest),
            7 => Some(Self::UnbindResponse),
            8 => Some(Self::SyncRequest),
            9 => Some(Self::SyncResponse),
            10 => Some(Self::AddChild),
            11 => Some(Self::RemoveChild),
            12 => Some(Self::ChangeAttribute),
            13 => Some(Self::ClearAttribute),
            14 => Some(Self::ChangeDirty),
            15 => Some(Self::QueryRequest),
            16 => Some(Self::QueryResponse),
            17 => Some(Self::ExecuteRequest),
            18 => Some(Self::ExecuteResponse),
            _ => None,
        }
    }

    /// Convert to the wire tag.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether the header carries a correlation id.
    pub fn is_correlated(self) -> bool {
        matches!(
            self,
            Self::Error
                | Self::BindRequest
                | Self::BindResponse
                | Self::UnbindRequest
                | Self::UnbindResponse
                | Self::SyncRequest
                | Self::SyncResponse
                | Self::QueryRequest
                | Self::QueryResponse
                | Self::ExecuteRequest
                | Self::ExecuteResponse
        )
    }

    /// Whether this message answers a correlated request.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::BindResponse
                | Self::UnbindResponse
                | Self::SyncResponse
                | Self::QueryResponse
                | Self::ExecuteResponse
        )
    }
}

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type.
    pub kind: MessageType,
    /// Payload length in bytes, not including the header.
    pub length: u32,
    /// Correlation id, present iff `kind.is_correlated()`.
    pub correlation: Option<u32>,
}

impl Header {
    /// Build a header, attaching the correlation id when the type needs one.
    ///
    /// `length` must fit in a `u32`; [`Message::encode_within`] checks this
    /// before building a header.
    ///
    /// [`Message::encode_within`]: crate::Message::encode_within
    pub fn new(kind: MessageType, length: usize, correlation: u32) -> Self {
        Self {
            kind,
            length: length as u32,
            correlation: kind.is_correlated().then_some(correlation),
        }
    }

    /// Whether the length fits the 1-byte form.
    pub fn is_short(&self) -> bool {
        (self.length as usize) < SHORT_LENGTH_LIMIT
    }

    /// Encoded size of this header.
    pub fn encoded_len(&self) -> usize {
        let length_bytes = if self.is_short() { 1 } else { 4 };
        let correlation_bytes = if self.correlation.is_some() { 4 } else { 0 };
        1 + length_bytes + correlation_bytes
    }

    /// Write the header.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        if self.is_short() {
            buf.put_u8(self.kind.to_u8());
            buf.put_u8(self.length as u8);
        } else {
            buf.put_u8(self.kind.to_u8() | LONG_FLAG);
            buf.put_u32(self.length);
        }
        if let Some(correlation) = self.correlation {
            buf.put_u32(correlation);
        }
    }

    /// Peek a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more bytes are needed. Never consumes input.
    pub fn decode(buf: &[u8]) -> Result<Option<(Header, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        let long = first & LONG_FLAG != 0;
        let tag = first & !LONG_FLAG;
        let kind = MessageType::from_u8(tag).ok_or(CoreError::UnknownMessageType(tag))?;

        let mut pos = 1;
        let length = if long {
            let Some(bytes) = buf.get(pos..pos + 4) else {
                return Ok(None);
            };
            pos += 4;
            let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if (length as usize) < SHORT_LENGTH_LIMIT {
                return Err(CoreError::MalformedHeader(format!(
                    "long form used for short length {}",
                    length
                )));
            }
            length
        } else {
            let Some(&byte) = buf.get(pos) else {
                return Ok(None);
            };
            pos += 1;
            if byte as usize >= SHORT_LENGTH_LIMIT {
                return Err(CoreError::MalformedHeader(format!(
                    "short form length {} out of range",
                    byte
                )));
            }
            u32::from(byte)
        };

        let correlation = if kind.is_correlated() {
            let Some(bytes) = buf.get(pos..pos + 4) else {
                return Ok(None);
            };
            pos += 4;
            Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        } else {
            None
        };

        Ok(Some((
            Header {
                kind,
                length,
                correlation,
            },
            pos,
        )))
    }
}

/// Location of one complete message inside a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// The decoded header.
    pub header: Header,
    /// Bytes taken by the header.
    pub header_len: usize,
    /// Header plus payload.
    pub total_len: usize,
}

impl Frame {
    /// Payload byte range within the buffer.
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.header_len..self.total_len
    }
}

/// Check whether `buf` starts with a complete message.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some(frame))` when the
/// whole message is present, and an error for a corrupt header or a payload
/// longer than `max_len`. Nothing is consumed.
pub fn frame(buf: &[u8], max_len: usize) -> Result<Option<Frame>> {
    let Some((header, header_len)) = Header::decode(buf)? else {
        return Ok(None);
    };

    let length = header.length as usize;
    if length > max_len {
        return Err(CoreError::FrameTooLarge {
            length,
            limit: max_len,
        });
    }

    let total_len = header_len + length;
    if buf.len() < total_len {
        return Ok(None);
    }

    Ok(Some(Frame {
        header,
        header_len,
        total_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(header: &Header) -> Vec<u8> {
        let mut buf = Vec::new();
        header.encode(&mut buf);
        buf
    }

    #[test]
    fn test_short_header_layout() {
        let header = Header::new(MessageType::Heartbeat, 1, 0);
        assert_eq!(encode(&header), vec![3, 1]);
        assert_eq!(header.encoded_len(), 2);
    }

    #[test]
    fn test_long_header_layout() {
        let header = Header::new(MessageType::AddChild, 300, 0);
        assert_eq!(encode(&header), vec![10 | 0x80, 0, 0, 1, 44]);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(Header::new(MessageType::AddChild, 127, 0).is_short());
        assert!(!Header::new(MessageType::AddChild, 128, 0).is_short());
    }

    #[test]
    fn test_correlated_header_layout() {
        let header = Header::new(MessageType::BindRequest, 5, 0x0102_0304);
        assert_eq!(encode(&header), vec![4, 5, 1, 2, 3, 4]);
    }

    #[test]
    fn test_uncorrelated_types_drop_correlation() {
        let header = Header::new(MessageType::ChangeDirty, 9, 77);
        assert_eq!(header.correlation, None);
    }

    #[test]
    fn test_unknown_type_is_error() {
        let err = Header::decode(&[0x7f, 0]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMessageType(0x7f)));
        assert!(err.is_framing());
    }

    #[test]
    fn test_non_canonical_lengths_rejected() {
        assert!(Header::decode(&[3, 200]).is_err());
        assert!(Header::decode(&[3 | 0x80, 0, 0, 0, 5]).is_err());
    }

    #[test]
    fn test_frame_waits_for_payload() {
        let mut buf = Vec::new();
        Header::new(MessageType::ChangeAttribute, 4, 0).encode(&mut buf);
        buf.extend_from_slice(&[1, 2, 3]);
        assert_eq!(frame(&buf, 1024).unwrap(), None);

        buf.push(4);
        let f = frame(&buf, 1024).unwrap().unwrap();
        assert_eq!(f.total_len, 6);
        assert_eq!(&buf[f.payload_range()], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_frame_partial_header() {
        assert_eq!(frame(&[], 1024).unwrap(), None);
        assert_eq!(frame(&[4 | 0x80, 0, 0], 1024).unwrap(), None);
        assert_eq!(frame(&[4, 5, 0, 0], 1024).unwrap(), None);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = Vec::new();
        Header::new(MessageType::AddChild, 4096, 0).encode(&mut buf);
        let err = frame(&buf, 1024).unwrap_err();
        assert!(matches!(err, CoreError::FrameTooLarge { length: 4096, limit: 1024 }));
    }

    proptest! {
        #[test]
        fn prop_frame_finds_exact_boundary(len in 0usize..70_000, tag in 1u8..=18, corr: u32) {
            let kind = MessageType::from_u8(tag).unwrap();
            let header = Header::new(kind, len, corr);
            let mut buf = Vec::new();
            header.encode(&mut buf);
            prop_assert_eq!(buf.len(), header.encoded_len());
            buf.resize(buf.len() + len, 0xaa);

            // One byte short is never a frame.
            prop_assert_eq!(frame(&buf[..buf.len() - 1], usize::MAX).unwrap(), None);

            let f = frame(&buf, usize::MAX).unwrap().unwrap();
            prop_assert_eq!(f.header, header);
            prop_assert_eq!(f.total_len, buf.len());
        }
    }
}
