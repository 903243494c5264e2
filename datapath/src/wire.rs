// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Length-prefixed, type-tagged attribute streams.
//!
//! Keys, action programs, and their nested payloads all share one shape: a
//! concatenation of `(u16 len, u16 type, payload)` records, each padded to a
//! 4-byte boundary. `len` covers the 4-byte header and the unpadded payload.
//! The header is native-endian; multi-byte protocol fields inside payloads
//! are big-endian.

/// Bytes in an attribute header.
pub const ATTR_HDR: usize = 4;

pub(crate) const fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// Errors raised while walking or decoding an attribute stream.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum WireError {
    /// The stream ended inside an attribute header or payload.
    #[error("truncated attribute at offset {0}")]
    Truncated(usize),
    /// An attribute type that is not valid in this context.
    #[error("unexpected attribute type {0}")]
    BadType(u16),
    /// An attribute whose payload length does not fit its type.
    #[error("bad payload length {len} for attribute type {ty}")]
    BadLength { ty: u16, len: usize },
    /// A required attribute was absent.
    #[error("missing required {0} attribute")]
    Missing(&'static str),
}

/// Serializer for an attribute stream.
#[derive(Debug, Default)]
pub struct AttrWriter {
    buf: Vec<u8>,
}

impl AttrWriter {
    #[must_use]
    pub fn new() -> Self {
        AttrWriter::default()
    }

    /// Append one attribute.
    pub fn put(&mut self, ty: u16, payload: &[u8]) {
        let len = ATTR_HDR + payload.len();
        debug_assert!(len <= usize::from(u16::MAX));
        self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
        self.buf.extend_from_slice(&ty.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(pad4(self.buf.len()), 0);
    }

    /// Append an empty attribute (a bare flag).
    pub fn put_empty(&mut self, ty: u16) {
        self.put(ty, &[]);
    }

    pub fn put_u32(&mut self, ty: u16, v: u32) {
        self.put(ty, &v.to_ne_bytes());
    }

    pub fn put_be16(&mut self, ty: u16, v: u16) {
        self.put(ty, &v.to_be_bytes());
    }

    pub fn put_be32(&mut self, ty: u16, v: u32) {
        self.put(ty, &v.to_be_bytes());
    }

    /// Open a nested attribute; close it with [`AttrWriter::end_nested`].
    pub fn begin_nested(&mut self, ty: u16) -> usize {
        let mark = self.buf.len();
        self.buf.extend_from_slice(&[0, 0]);
        self.buf.extend_from_slice(&ty.to_ne_bytes());
        mark
    }

    /// Patch the length of the nested attribute opened at `mark`.
    ///
    /// Everything appended since stays 4-byte aligned, so the running length
    /// is already the true length.
    pub fn end_nested(&mut self, mark: usize) {
        let len = self.buf.len() - mark;
        debug_assert!(len <= usize::from(u16::MAX));
        self.buf[mark..mark + 2].copy_from_slice(&(len as u16).to_ne_bytes());
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// One attribute borrowed out of a stream.
#[derive(Copy, Clone, Debug)]
pub struct Attr<'a> {
    pub ty: u16,
    pub payload: &'a [u8],
}

impl<'a> Attr<'a> {
    /// Payload checked against the fixed length of this attribute type.
    pub fn expect_len(&self, len: usize) -> Result<&'a [u8], WireError> {
        if self.payload.len() == len {
            Ok(self.payload)
        } else {
            Err(WireError::BadLength {
                ty: self.ty,
                len: self.payload.len(),
            })
        }
    }

    pub fn u32(&self) -> Result<u32, WireError> {
        let b = self.expect_len(4)?;
        Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn be16(&self) -> Result<u16, WireError> {
        let b = self.expect_len(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn be32(&self) -> Result<u32, WireError> {
        let b = self.expect_len(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Iterate the payload as a nested attribute stream.
    #[must_use]
    pub fn nested(&self) -> AttrIter<'a> {
        attrs(self.payload)
    }
}

/// Walk an attribute stream.
#[must_use]
pub fn attrs(buf: &[u8]) -> AttrIter<'_> {
    AttrIter { buf, pos: 0 }
}

/// Iterator over the attributes of a stream; fuses after an error.
#[derive(Debug)]
pub struct AttrIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<Attr<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        if self.buf.len() - self.pos < ATTR_HDR {
            let err = WireError::Truncated(self.pos);
            self.pos = self.buf.len();
            return Some(Err(err));
        }
        let len = usize::from(u16::from_ne_bytes([self.buf[self.pos], self.buf[self.pos + 1]]));
        let ty = u16::from_ne_bytes([self.buf[self.pos + 2], self.buf[self.pos + 3]]);
        if len < ATTR_HDR || self.pos + len > self.buf.len() {
            let err = WireError::Truncated(self.pos);
            self.pos = self.buf.len();
            return Some(Err(err));
        }
        let payload = &self.buf[self.pos + ATTR_HDR..self.pos + len];
        self.pos += pad4(len);
        Some(Ok(Attr { ty, payload }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_and_walk() {
        let mut w = AttrWriter::new();
        w.put_u32(1, 7);
        w.put(2, &[0xaa; 6]);
        w.put_empty(3);
        let buf = w.finish();

        let got: Vec<_> = attrs(&buf).map(Result::unwrap).collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].ty, 1);
        assert_eq!(got[0].u32().unwrap(), 7);
        assert_eq!(got[1].payload, &[0xaa; 6]);
        assert_eq!(got[2].payload.len(), 0);
    }

    #[test]
    fn payloads_are_padded_but_len_is_exact() {
        let mut w = AttrWriter::new();
        w.put(9, &[1, 2, 3]);
        let buf = w.finish();
        assert_eq!(buf.len(), 8);

        let a = attrs(&buf).next().unwrap().unwrap();
        assert_eq!(a.payload, &[1, 2, 3]);
    }

    #[test]
    fn nested_lengths_are_patched() {
        let mut w = AttrWriter::new();
        let mark = w.begin_nested(5);
        w.put_u32(1, 42);
        w.put_be16(2, 0x0800);
        w.end_nested(mark);
        let buf = w.finish();

        let outer = attrs(&buf).next().unwrap().unwrap();
        assert_eq!(outer.ty, 5);
        let inner: Vec<_> = outer.nested().map(Result::unwrap).collect();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].u32().unwrap(), 42);
        assert_eq!(inner[1].be16().unwrap(), 0x0800);
    }

    #[test]
    fn truncated_stream_errors_once() {
        let mut w = AttrWriter::new();
        w.put_u32(1, 7);
        let mut buf = w.finish();
        buf.truncate(6);

        let mut it = attrs(&buf);
        assert!(matches!(it.next(), Some(Err(WireError::Truncated(0)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn length_smaller_than_header_is_truncation() {
        let buf = [2u16.to_ne_bytes(), 1u16.to_ne_bytes()].concat();
        let mut it = attrs(&buf);
        assert!(matches!(it.next(), Some(Err(WireError::Truncated(0)))));
    }
}
