//! Payload field encoding.
//!
//! Message payloads are a flat sequence of big-endian fields. Strings and
//! blobs are prefixed with a 4-byte length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::TreeCodec;
use crate::error::{CoreError, Result};
use crate::fragment::{Fragment, WireValue};
use crate::types::NetworkId;

/// Append-only payload builder.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn put_net_id(&mut self, id: NetworkId) {
        self.buf.put_u64(id.get());
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) {
        self.put_blob(s.as_bytes());
    }

    /// Length-prefixed opaque bytes.
    pub fn put_blob(&mut self, bytes: &[u8]) {
        self.buf.put_u32(bytes.len() as u32);
        self.buf.put_slice(bytes);
    }

    /// A fragment, encoded by the codec and written as a blob.
    pub fn put_fragment(&mut self, codec: &dyn TreeCodec, fragment: &Fragment) -> Result<()> {
        let bytes = codec.encode(fragment)?;
        self.put_blob(&bytes);
        Ok(())
    }

    /// A type-tagged value.
    pub fn put_value(&mut self, codec: &dyn TreeCodec, value: &WireValue) -> Result<()> {
        self.put_u8(value.tag());
        match value {
            WireValue::Nodes(nodes) => {
                self.put_u32(nodes.len() as u32);
                for node in nodes {
                    self.put_fragment(codec, node)?;
                }
            }
            WireValue::Text(s) => self.put_str(s),
            WireValue::Number(n) => self.put_f64(*n),
            WireValue::Bool(b) => self.put_bool(*b),
        }
        Ok(())
    }

    /// A list of named values (a variable scope).
    pub fn put_bindings(
        &mut self,
        codec: &dyn TreeCodec,
        bindings: &[(String, WireValue)],
    ) -> Result<()> {
        self.put_u32(bindings.len() as u32);
        for (name, value) in bindings {
            self.put_str(name);
            self.put_value(codec, value)?;
        }
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a received payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Read from the given payload bytes.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(CoreError::Underflow {
                needed: n,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn get_net_id(&mut self) -> Result<NetworkId> {
        Ok(NetworkId::new(self.get_u64()?))
    }

    /// Length-prefixed bytes, borrowed from the payload.
    pub fn get_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let bytes = self.get_blob()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CoreError::InvalidUtf8)
    }

    pub fn get_fragment(&mut self, codec: &dyn TreeCodec) -> Result<Fragment> {
        let bytes = self.get_blob()?;
        codec.decode(bytes)
    }

    pub fn get_value(&mut self, codec: &dyn TreeCodec) -> Result<WireValue> {
        match self.get_u8()? {
            0 => {
                let count = self.get_u32()? as usize;
                // Each fragment costs at least its 4-byte length prefix.
                self.need(count.saturating_mul(4))?;
                let mut nodes = Vec::with_capacity(count);
                for _ in 0..count {
                    nodes.push(self.get_fragment(codec)?);
                }
                Ok(WireValue::Nodes(nodes))
            }
            1 => Ok(WireValue::Text(self.get_str()?)),
            2 => Ok(WireValue::Number(self.get_f64()?)),
            3 => Ok(WireValue::Bool(self.get_bool()?)),
            tag => Err(CoreError::UnknownValueTag(tag)),
        }
    }

    pub fn get_bindings(&mut self, codec: &dyn TreeCodec) -> Result<Vec<(String, WireValue)>> {
        let count = self.get_u32()? as usize;
        self.need(count.saturating_mul(5))?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.get_str()?;
            let value = self.get_value(codec)?;
            out.push((name, value));
        }
        Ok(out)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail if any bytes were left unread.
    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CoreError::TrailingBytes(self.buf.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CborCodec;

    #[test]
    fn test_scalar_fields() {
        let mut w = PayloadWriter::new();
        w.put_u8(7);
        w.put_u32(0xdead_beef);
        w.put_u64(42);
        w.put_bool(true);
        w.put_str("héllo");
        let bytes = w.finish();

        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.get_u64().unwrap(), 42);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_str().unwrap(), "héllo");
        r.finish().unwrap();
    }

    #[test]
    fn test_big_endian_layout() {
        let mut w = PayloadWriter::new();
        w.put_u32(1);
        assert_eq!(&w.finish()[..], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_underflow_detected() {
        let mut r = PayloadReader::new(&[0, 0, 0, 9, b'a']);
        let err = r.get_str().unwrap_err();
        assert!(matches!(err, CoreError::Underflow { needed: 9, remaining: 1 }));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let r = PayloadReader::new(&[1, 2]);
        assert!(matches!(r.finish(), Err(CoreError::TrailingBytes(2))));
    }

    #[test]
    fn test_values_and_bindings() {
        let codec = CborCodec::new();
        let bindings = vec![
            ("n".to_string(), WireValue::Number(1.5)),
            ("s".to_string(), WireValue::Text("x".into())),
            ("b".to_string(), WireValue::Bool(false)),
            (
                "nodes".to_string(),
                WireValue::Nodes(vec![Fragment::new("a"), Fragment::new("b").attr("k", "v")]),
            ),
        ];

        let mut w = PayloadWriter::new();
        w.put_bindings(&codec, &bindings).unwrap();
        let bytes = w.finish();

        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.get_bindings(&codec).unwrap(), bindings);
        r.finish().unwrap();
    }

    #[test]
    fn test_unknown_value_tag() {
        let codec = CborCodec::new();
        let mut r = PayloadReader::new(&[9]);
        assert!(matches!(r.get_value(&codec), Err(CoreError::UnknownValueTag(9))));
    }
}
