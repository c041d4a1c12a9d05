//! Minimal VelocyPack codec for request and response envelopes.
//!
//! VelocyPack is the compact binary value encoding the wire protocol uses
//! for message heads (request line, response line, authentication). The
//! driver core only ever builds a handful of fixed shapes (arrays of
//! integers and strings plus string-to-string objects) and reads back the
//! response head, so this module implements exactly that subset:
//!
//! - encode: unsigned integers, strings, arrays, string-map objects
//! - decode: the above plus compact arrays/objects (`0x13`/`0x14`), which
//!   servers commonly emit
//!
//! Request and response *bodies* are opaque byte buffers to the core;
//! callers that want to construct VelocyPack bodies can use the encoding
//! half of this module directly.

use std::collections::BTreeMap;

use crate::error::{DriverError, DriverResult};

// Value type tags (subset).
const TAG_ARRAY_EMPTY: u8 = 0x01;
const TAG_ARRAY_UNINDEXED_1: u8 = 0x02;
const TAG_ARRAY_INDEXED_1: u8 = 0x06;
const TAG_ARRAY_INDEXED_8: u8 = 0x09;
const TAG_OBJECT_EMPTY: u8 = 0x0a;
const TAG_OBJECT_1: u8 = 0x0b;
const TAG_OBJECT_8: u8 = 0x0e;
const TAG_ARRAY_COMPACT: u8 = 0x13;
const TAG_OBJECT_COMPACT: u8 = 0x14;
const TAG_NULL: u8 = 0x18;
const TAG_FALSE: u8 = 0x19;
const TAG_TRUE: u8 = 0x1a;
const TAG_DOUBLE: u8 = 0x1b;
const TAG_INT_1: u8 = 0x20;
const TAG_UINT_1: u8 = 0x28;
const TAG_SMALL_INT_0: u8 = 0x30;
const TAG_STRING_EMPTY: u8 = 0x40;
const TAG_STRING_LONG: u8 = 0xbf;

/// Longest string encodable with a one-byte tag.
const SHORT_STRING_MAX: usize = 126;

// =============================================================================
// Encoding
// =============================================================================

/// Encode an unsigned integer.
pub fn uint(value: u64) -> Vec<u8> {
    if value <= 9 {
        return vec![TAG_SMALL_INT_0 + value as u8];
    }
    let bytes = value.to_le_bytes();
    let width = (8 - value.leading_zeros() as usize / 8).max(1);
    let mut out = Vec::with_capacity(1 + width);
    out.push(TAG_UINT_1 + (width as u8 - 1));
    out.extend_from_slice(&bytes[..width]);
    out
}

/// Encode a UTF-8 string.
pub fn string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    if bytes.len() <= SHORT_STRING_MAX {
        let mut out = Vec::with_capacity(1 + bytes.len());
        out.push(TAG_STRING_EMPTY + bytes.len() as u8);
        out.extend_from_slice(bytes);
        out
    } else {
        let mut out = Vec::with_capacity(9 + bytes.len());
        out.push(TAG_STRING_LONG);
        out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(bytes);
        out
    }
}

/// Encode an array from already-encoded item values.
///
/// Items of equal byte size produce the unindexed form; mixed sizes produce
/// the indexed form with an offset table.
pub fn array(items: &[Vec<u8>]) -> Vec<u8> {
    if items.is_empty() {
        return vec![TAG_ARRAY_EMPTY];
    }
    let data_len: usize = items.iter().map(Vec::len).sum();
    let same_size = items.iter().all(|item| item.len() == items[0].len());

    if same_size {
        // tag + bytelen + items
        let width = len_width(1 + 8 + data_len);
        let total = 1 + width + data_len;
        let mut out = Vec::with_capacity(total);
        out.push(TAG_ARRAY_UNINDEXED_1 + width_tag_offset(width));
        push_len(&mut out, total as u64, width);
        for item in items {
            out.extend_from_slice(item);
        }
        return out;
    }

    // tag + bytelen + nritems + items + offset table
    let width = len_width(1 + 2 * 8 + data_len + items.len() * 8);
    let header = 1 + 2 * width;
    let total = header + data_len + items.len() * width;
    let mut out = Vec::with_capacity(total);
    out.push(TAG_ARRAY_INDEXED_1 + width_tag_offset(width));
    push_len(&mut out, total as u64, width);
    push_len(&mut out, items.len() as u64, width);
    let mut offsets = Vec::with_capacity(items.len());
    let mut offset = header;
    for item in items {
        offsets.push(offset as u64);
        offset += item.len();
        out.extend_from_slice(item);
    }
    for off in offsets {
        push_len(&mut out, off, width);
    }
    out
}

/// Encode a string-to-string object. Keys are stored sorted, as the format
/// requires for the indexed object forms.
pub fn object(entries: &BTreeMap<String, String>) -> Vec<u8> {
    if entries.is_empty() {
        return vec![TAG_OBJECT_EMPTY];
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = entries
        .iter()
        .map(|(k, v)| (string(k), string(v)))
        .collect();
    let data_len: usize = pairs.iter().map(|(k, v)| k.len() + v.len()).sum();

    let width = len_width(1 + 2 * 8 + data_len + pairs.len() * 8);
    let header = 1 + 2 * width;
    let total = header + data_len + pairs.len() * width;
    let mut out = Vec::with_capacity(total);
    out.push(TAG_OBJECT_1 + width_tag_offset(width));
    push_len(&mut out, total as u64, width);
    push_len(&mut out, pairs.len() as u64, width);
    let mut offsets = Vec::with_capacity(pairs.len());
    let mut offset = header;
    for (key, value) in &pairs {
        offsets.push(offset as u64);
        offset += key.len() + value.len();
        out.extend_from_slice(key);
        out.extend_from_slice(value);
    }
    for off in offsets {
        push_len(&mut out, off, width);
    }
    out
}

/// Smallest supported field width (1, 2 or 4 bytes) holding `len`.
fn len_width(len: usize) -> usize {
    if len <= u8::MAX as usize {
        1
    } else if len <= u16::MAX as usize {
        2
    } else {
        4
    }
}

/// Tag adjustment for a 1/2/4-byte field width (widths map to consecutive
/// type tags).
fn width_tag_offset(width: usize) -> u8 {
    match width {
        1 => 0,
        2 => 1,
        _ => 2,
    }
}

fn push_len(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_le_bytes()[..width]);
}

// =============================================================================
// Decoding
// =============================================================================

/// A borrowed view of one VelocyPack value.
///
/// A slice starts at a type tag and spans exactly the value's bytes; nested
/// values are returned as sub-slices of the same buffer.
#[derive(Clone, Copy)]
pub struct Slice<'a> {
    buf: &'a [u8],
}

impl<'a> Slice<'a> {
    /// View the value starting at the beginning of `buf`. Trailing bytes
    /// after the value are allowed and ignored.
    pub fn new(buf: &'a [u8]) -> DriverResult<Self> {
        if buf.is_empty() {
            return Err(DriverError::protocol("empty VelocyPack value"));
        }
        let slice = Slice { buf };
        let size = slice.byte_size()?;
        if size > buf.len() {
            return Err(DriverError::protocol(format!(
                "VelocyPack value of {size} bytes exceeds the {} available",
                buf.len()
            )));
        }
        Ok(Slice { buf: &buf[..size] })
    }

    /// The value's type tag.
    pub fn tag(&self) -> u8 {
        self.buf[0]
    }

    /// Total encoded size of this value in bytes.
    pub fn byte_size(&self) -> DriverResult<usize> {
        let tag = self.tag();
        let size = match tag {
            TAG_ARRAY_EMPTY | TAG_OBJECT_EMPTY | TAG_NULL | TAG_FALSE | TAG_TRUE => 1,
            TAG_DOUBLE => 9,
            0x02..=0x05 => self.read_len(1, 1 << (tag - TAG_ARRAY_UNINDEXED_1))? as usize,
            0x06..=0x09 => self.read_len(1, 1 << (tag - TAG_ARRAY_INDEXED_1))? as usize,
            0x0b..=0x0e => self.read_len(1, 1 << (tag - TAG_OBJECT_1))? as usize,
            TAG_ARRAY_COMPACT | TAG_OBJECT_COMPACT => {
                let (len, _) = read_vint(&self.buf[1..])?;
                len as usize
            }
            0x20..=0x27 => 2 + (tag - TAG_INT_1) as usize,
            0x28..=0x2f => 2 + (tag - TAG_UINT_1) as usize,
            0x30..=0x3f => 1,
            0x40..=0xbe => 1 + (tag - TAG_STRING_EMPTY) as usize,
            TAG_STRING_LONG => 9 + self.read_len(1, 8)? as usize,
            other => {
                return Err(DriverError::protocol(format!(
                    "unsupported VelocyPack type 0x{other:02x}"
                )))
            }
        };
        if size == 0 {
            return Err(DriverError::protocol("zero-length VelocyPack value"));
        }
        Ok(size)
    }

    /// Read the value as an unsigned integer.
    pub fn as_u64(&self) -> DriverResult<u64> {
        let tag = self.tag();
        match tag {
            TAG_SMALL_INT_0..=0x39 => Ok((tag - TAG_SMALL_INT_0) as u64),
            0x28..=0x2f => self.read_len(1, 1 + (tag - TAG_UINT_1) as usize),
            0x20..=0x27 => {
                let width = 1 + (tag - TAG_INT_1) as usize;
                let raw = self.read_len(1, width)?;
                // Sign-extend, then refuse negatives.
                let shift = 64 - 8 * width as u32;
                let value = ((raw << shift) as i64) >> shift;
                u64::try_from(value).map_err(|_| {
                    DriverError::protocol(format!("expected unsigned integer, got {value}"))
                })
            }
            other => Err(DriverError::protocol(format!(
                "expected integer, got type 0x{other:02x}"
            ))),
        }
    }

    /// Read the value as a string.
    pub fn as_str(&self) -> DriverResult<&'a str> {
        let tag = self.tag();
        let bytes = match tag {
            0x40..=0xbe => {
                let len = (tag - TAG_STRING_EMPTY) as usize;
                self.bytes_at(1, len)?
            }
            TAG_STRING_LONG => {
                let len = self.read_len(1, 8)? as usize;
                self.bytes_at(9, len)?
            }
            other => {
                return Err(DriverError::protocol(format!(
                    "expected string, got type 0x{other:02x}"
                )))
            }
        };
        std::str::from_utf8(bytes)
            .map_err(|_| DriverError::protocol("string value is not valid UTF-8"))
    }

    /// Read the value as an array of sub-slices.
    pub fn array_items(&self) -> DriverResult<Vec<Slice<'a>>> {
        let tag = self.tag();
        match tag {
            TAG_ARRAY_EMPTY => Ok(Vec::new()),
            0x02..=0x05 => {
                let width = 1 << (tag - TAG_ARRAY_UNINDEXED_1);
                self.scan_items(1 + width, self.buf.len(), None)
            }
            0x06..=0x08 => {
                let width = 1 << (tag - TAG_ARRAY_INDEXED_1);
                let count = self.read_len(1 + width, width)? as usize;
                let table = self.offset_table(count, width, 0)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let offset = self.read_len(table + i * width, width)? as usize;
                    items.push(self.value_at(offset)?);
                }
                Ok(items)
            }
            TAG_ARRAY_INDEXED_8 => {
                // Item count lives behind the offset table.
                let count = self.read_len(self.buf.len() - 8, 8)? as usize;
                let table = self.offset_table(count, 8, 8)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let offset = self.read_len(table + i * 8, 8)? as usize;
                    items.push(self.value_at(offset)?);
                }
                Ok(items)
            }
            TAG_ARRAY_COMPACT => {
                let (_, header) = read_vint(&self.buf[1..])?;
                let (count, count_len) = read_vint_reverse(self.buf)?;
                self.scan_items(
                    1 + header,
                    self.buf.len() - count_len,
                    Some(count as usize),
                )
            }
            other => Err(DriverError::protocol(format!(
                "expected array, got type 0x{other:02x}"
            ))),
        }
    }

    /// Read the value as an object of string keys and sub-slice values.
    pub fn object_entries(&self) -> DriverResult<Vec<(&'a str, Slice<'a>)>> {
        let tag = self.tag();
        let (count, table, width) = match tag {
            TAG_OBJECT_EMPTY => return Ok(Vec::new()),
            0x0b..=0x0d => {
                let width = 1 << (tag - TAG_OBJECT_1);
                let count = self.read_len(1 + width, width)? as usize;
                (count, self.offset_table(count, width, 0)?, width)
            }
            TAG_OBJECT_8 => {
                let count = self.read_len(self.buf.len() - 8, 8)? as usize;
                (count, self.offset_table(count, 8, 8)?, 8)
            }
            TAG_OBJECT_COMPACT => {
                // Keys and values alternate; no offset table.
                let (_, header) = read_vint(&self.buf[1..])?;
                let (count, count_len) = read_vint_reverse(self.buf)?;
                let items = self.scan_items(
                    1 + header,
                    self.buf.len() - count_len,
                    Some(2 * count as usize),
                )?;
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    entries.push((key.as_str()?, value));
                }
                return Ok(entries);
            }
            other => {
                return Err(DriverError::protocol(format!(
                    "expected object, got type 0x{other:02x}"
                )))
            }
        };

        // Each table offset points at a key; its value follows immediately.
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = self.read_len(table + i * width, width)? as usize;
            let key = self.value_at(offset)?;
            let value = self.value_at(offset + key.byte_size()?)?;
            entries.push((key.as_str()?, value));
        }
        Ok(entries)
    }

    /// Read the value as a map of string keys to string values.
    pub fn as_string_map(&self) -> DriverResult<BTreeMap<String, String>> {
        self.object_entries()?
            .into_iter()
            .map(|(key, value)| Ok((key.to_owned(), value.as_str()?.to_owned())))
            .collect()
    }

    /// Start of an offset table of `count` entries of `width` bytes sitting
    /// `trailer` bytes before the end of the value.
    fn offset_table(&self, count: usize, width: usize, trailer: usize) -> DriverResult<usize> {
        count
            .checked_mul(width)
            .and_then(|table_len| self.buf.len().checked_sub(table_len + trailer))
            .ok_or_else(|| DriverError::protocol("VelocyPack index table exceeds the value"))
    }

    fn value_at(&self, offset: usize) -> DriverResult<Slice<'a>> {
        if offset >= self.buf.len() {
            return Err(DriverError::protocol("VelocyPack offset out of bounds"));
        }
        Slice::new(&self.buf[offset..])
    }

    /// Sequentially parse contiguous values in `buf[start..end)`. With a
    /// count, exactly that many are read; without one, reading continues to
    /// `end`.
    fn scan_items(
        &self,
        start: usize,
        end: usize,
        count: Option<usize>,
    ) -> DriverResult<Vec<Slice<'a>>> {
        let mut items = Vec::new();
        let mut offset = start;
        while offset < end && count.map(|c| items.len() < c).unwrap_or(true) {
            let item = self.value_at(offset)?;
            offset += item.byte_size()?;
            items.push(item);
        }
        if let Some(expected) = count {
            if items.len() != expected {
                return Err(DriverError::protocol(format!(
                    "expected {expected} items, found {}",
                    items.len()
                )));
            }
        }
        Ok(items)
    }

    fn bytes_at(&self, offset: usize, len: usize) -> DriverResult<&'a [u8]> {
        self.buf
            .get(offset..offset + len)
            .ok_or_else(|| DriverError::protocol("truncated VelocyPack value"))
    }

    fn read_len(&self, offset: usize, width: usize) -> DriverResult<u64> {
        let bytes = self.bytes_at(offset, width)?;
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}

impl std::fmt::Debug for Slice<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Slice(0x{:02x}, {} bytes)", self.tag(), self.buf.len())
    }
}

/// Forward variable-length unsigned integer: 7 bits per byte, high bit set
/// on all bytes but the last.
fn read_vint(buf: &[u8]) -> DriverResult<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 9 {
            break;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(DriverError::protocol("malformed variable-length integer"))
}

/// Variable-length integer stored in reverse byte order at the end of the
/// buffer (compact array/object item count).
fn read_vint_reverse(buf: &[u8]) -> DriverResult<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().rev().enumerate() {
        if i >= 9 {
            break;
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(DriverError::protocol("malformed variable-length integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_small() {
        assert_eq!(uint(0), vec![0x30]);
        assert_eq!(uint(9), vec![0x39]);
    }

    #[test]
    fn test_uint_widths() {
        assert_eq!(uint(200), vec![0x28, 200]);
        assert_eq!(uint(1000), vec![0x29, 0xe8, 0x03]);
        let value = uint(u64::MAX);
        assert_eq!(value[0], 0x2f);
        assert_eq!(value.len(), 9);
    }

    #[test]
    fn test_uint_roundtrip() {
        for value in [0, 1, 9, 10, 255, 256, 1000, 65_536, u64::MAX] {
            let encoded = uint(value);
            let slice = Slice::new(&encoded).expect("parse");
            assert_eq!(slice.as_u64().expect("u64"), value, "value {value}");
            assert_eq!(slice.byte_size().expect("size"), encoded.len());
        }
    }

    #[test]
    fn test_string_roundtrip() {
        let long = "x".repeat(126);
        let very_long = "y".repeat(4000);
        for value in ["", "a", "_system", long.as_str(), very_long.as_str()] {
            let encoded = string(value);
            let slice = Slice::new(&encoded).expect("parse");
            assert_eq!(slice.as_str().expect("str"), value);
            assert_eq!(slice.byte_size().expect("size"), encoded.len());
        }
    }

    #[test]
    fn test_empty_array_and_object() {
        assert_eq!(array(&[]), vec![0x01]);
        assert_eq!(object(&BTreeMap::new()), vec![0x0a]);
        let arr = Slice::new(&[0x01]).expect("parse");
        assert!(arr.array_items().expect("items").is_empty());
        let obj = Slice::new(&[0x0a]).expect("parse");
        assert!(obj.object_entries().expect("entries").is_empty());
    }

    #[test]
    fn test_array_same_size_items_unindexed() {
        let encoded = array(&[uint(1), uint(2), uint(3)]);
        assert_eq!(encoded[0], 0x02);
        let slice = Slice::new(&encoded).expect("parse");
        let items = slice.array_items().expect("items");
        let values: Vec<u64> = items.iter().map(|i| i.as_u64().expect("u64")).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_array_mixed_items_indexed() {
        let encoded = array(&[uint(1), string("_system"), uint(1000)]);
        assert_eq!(encoded[0], 0x06);
        let slice = Slice::new(&encoded).expect("parse");
        let items = slice.array_items().expect("items");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_u64().expect("u64"), 1);
        assert_eq!(items[1].as_str().expect("str"), "_system");
        assert_eq!(items[2].as_u64().expect("u64"), 1000);
    }

    #[test]
    fn test_large_array_widens_fields() {
        let long = string(&"z".repeat(300));
        let encoded = array(&[long, uint(1)]);
        assert_eq!(encoded[0], 0x07);
        let slice = Slice::new(&encoded).expect("parse");
        let items = slice.array_items().expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_u64().expect("u64"), 1);
    }

    #[test]
    fn test_object_roundtrip() {
        let mut entries = BTreeMap::new();
        entries.insert("content-type".to_owned(), "application/json".to_owned());
        entries.insert("x-trace".to_owned(), "abc".to_owned());
        let encoded = object(&entries);
        let slice = Slice::new(&encoded).expect("parse");
        assert_eq!(slice.as_string_map().expect("map"), entries);
    }

    #[test]
    fn test_object_keys_sorted() {
        let mut entries = BTreeMap::new();
        entries.insert("b".to_owned(), "2".to_owned());
        entries.insert("a".to_owned(), "1".to_owned());
        let encoded = object(&entries);
        let slice = Slice::new(&encoded).expect("parse");
        let pairs = slice.object_entries().expect("entries");
        assert_eq!(pairs[0].0, "a");
        assert_eq!(pairs[1].0, "b");
    }

    #[test]
    fn test_compact_array_decodes() {
        // [1, "ok"] in the compact encoding: tag, bytelen, items, count.
        let mut encoded = vec![0x13, 0x00, 0x31];
        encoded.extend_from_slice(&string("ok"));
        encoded.push(0x02);
        encoded[1] = encoded.len() as u8;
        let slice = Slice::new(&encoded).expect("parse");
        let items = slice.array_items().expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_u64().expect("u64"), 1);
        assert_eq!(items[1].as_str().expect("str"), "ok");
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut encoded = uint(7);
        encoded.extend_from_slice(b"body bytes");
        let slice = Slice::new(&encoded).expect("parse");
        assert_eq!(slice.as_u64().expect("u64"), 7);
        assert_eq!(slice.byte_size().expect("size"), 1);
    }

    #[test]
    fn test_type_mismatch_errors() {
        let encoded = string("nope");
        let slice = Slice::new(&encoded).expect("parse");
        assert!(matches!(slice.as_u64(), Err(DriverError::Protocol { .. })));
        let encoded = uint(3);
        let slice = Slice::new(&encoded).expect("parse");
        assert!(matches!(slice.as_str(), Err(DriverError::Protocol { .. })));
        assert!(matches!(
            slice.array_items(),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn test_truncated_value_rejected() {
        let encoded = string("hello world");
        assert!(matches!(
            Slice::new(&encoded[..4]),
            Err(DriverError::Protocol { .. })
        ));
        assert!(matches!(Slice::new(&[]), Err(DriverError::Protocol { .. })));
    }

    #[test]
    fn test_unsupported_type_rejected() {
        assert!(matches!(
            Slice::new(&[0xcc]),
            Err(DriverError::Protocol { .. })
        ));
    }
}
