//! Envelope framing: writing and bounds-checked reading of field records

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::{DecodeError, DecodeResult};
use crate::field::{END_MARKER, FieldId};
use crate::structured::Structured;
use crate::value::{FieldValue, WireKind};

const LEN_PREFIX: usize = 4;
const RECORD_HEADER: usize = 4 + 1 + 4;
const END_RECORD: [u8; 5] = [0; 5];

/// Accumulates field records into an envelope
#[derive(Debug)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl Default for FieldWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0; LEN_PREFIX]);
        Self { buf }
    }

    /// Append one record. Absent values (e.g. `None`) write nothing.
    pub fn write<T: FieldValue>(&mut self, id: FieldId, value: &T) {
        if !value.is_present() {
            return;
        }
        self.buf.extend_from_slice(&id.to_le_bytes());
        self.buf.push(T::KIND.tag());
        let len_at = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        value.encode_value(&mut self.buf);
        let value_len = self.buf.len() - len_at - 4;
        self.buf[len_at..len_at + 4].copy_from_slice(&(value_len as u32).to_le_bytes());
    }

    /// Close the envelope and return its bytes.
    ///
    /// Lengths are written as `u32`; callers enforce a size limit below
    /// `u32::MAX` (see [`crate::Codec`]) so an oversized message never leaves.
    pub fn into_envelope(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&END_RECORD);
        let body_len = (self.buf.len() - LEN_PREFIX) as u32;
        self.buf[..LEN_PREFIX].copy_from_slice(&body_len.to_le_bytes());
        self.buf
    }
}

#[derive(Debug, Clone, Copy)]
struct Record<'a> {
    id: FieldId,
    tag: u8,
    value: &'a [u8],
}

/// Parsed view over one envelope
///
/// Parsing validates the framing of every record up front, so looking up a
/// field never touches bytes outside the envelope. Records whose identifier
/// is never asked for are simply skipped.
#[derive(Debug)]
pub struct FieldReader<'a> {
    records: Vec<Record<'a>>,
    index: HashMap<FieldId, usize>,
}

impl<'a> FieldReader<'a> {
    /// Parse an input that must contain exactly one envelope
    pub fn parse(input: &'a [u8]) -> DecodeResult<Self> {
        let (reader, consumed) = Self::parse_prefix(input)?;
        if consumed != input.len() {
            return Err(DecodeError::TrailingBytes {
                count: input.len() - consumed,
            });
        }
        Ok(reader)
    }

    /// Parse one envelope from the front of `input`, returning bytes consumed
    pub fn parse_prefix(input: &'a [u8]) -> DecodeResult<(Self, usize)> {
        let declared = read_u32(input, 0)? as usize;
        let available = input.len() - LEN_PREFIX;
        if declared > available {
            return Err(DecodeError::BadLength { declared, available });
        }
        let body = &input[LEN_PREFIX..LEN_PREFIX + declared];

        let mut records: Vec<Record<'a>> = Vec::new();
        let mut index = HashMap::new();
        let mut cursor = 0;
        loop {
            if cursor == body.len() {
                return Err(DecodeError::MissingEndMarker);
            }
            let id = read_u32(body, cursor)?;
            let tag = *body.get(cursor + 4).ok_or(DecodeError::Truncated {
                offset: cursor + 4,
                needed: 1,
                available: 0,
            })?;

            if id == END_MARKER {
                if tag != 0 {
                    return Err(DecodeError::ReservedFieldId { tag });
                }
                let end = cursor + END_RECORD.len();
                if end != body.len() {
                    return Err(DecodeError::TrailingBytes {
                        count: body.len() - end,
                    });
                }
                break;
            }

            let value_len = read_u32(body, cursor + 5)? as usize;
            let start = cursor + RECORD_HEADER;
            let remaining = body.len() - start;
            if value_len > remaining {
                return Err(DecodeError::Truncated {
                    offset: start,
                    needed: value_len,
                    available: remaining,
                });
            }
            match index.entry(id) {
                Entry::Occupied(_) => return Err(DecodeError::DuplicateField { field: id }),
                Entry::Vacant(slot) => {
                    slot.insert(records.len());
                }
            }
            records.push(Record {
                id,
                tag,
                value: &body[start..start + value_len],
            });
            cursor = start + value_len;
        }

        Ok((Self { records, index }, LEN_PREFIX + declared))
    }

    /// Decode field `id` into `slot`. A missing field leaves `slot` untouched.
    pub fn read<T: FieldValue>(&self, id: FieldId, slot: &mut T) -> DecodeResult<()> {
        let Some(record) = self.index.get(&id).and_then(|&at| self.records.get(at)) else {
            return Ok(());
        };
        let actual = WireKind::from_tag(record.tag).ok_or(DecodeError::UnknownTag { field: id, tag: record.tag })?;
        if actual != T::KIND {
            return Err(DecodeError::KindMismatch {
                field: id,
                expected: T::KIND,
                actual,
            });
        }
        *slot = T::decode_value(record.value)?;
        Ok(())
    }

    /// Whether the envelope carries field `id`
    pub fn contains(&self, id: FieldId) -> bool {
        self.index.contains_key(&id)
    }

    /// Identifiers present in the envelope, in wire order
    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.records.iter().map(|r| r.id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> DecodeResult<u32> {
    let available = bytes.len().saturating_sub(offset);
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(DecodeError::Truncated {
            offset,
            needed: 4,
            available,
        })?;
    Ok(u32::from_le_bytes(raw))
}

/// Write `value` as a complete envelope into `out` (nested field payload)
pub fn encode_nested<T: Structured>(value: &T, out: &mut Vec<u8>) {
    let mut writer = FieldWriter::new();
    value.write_fields(&mut writer);
    out.extend_from_slice(&writer.into_envelope());
}

/// Decode a nested field payload that must be exactly one envelope
pub fn decode_nested<T: Structured>(bytes: &[u8]) -> DecodeResult<T> {
    let reader = FieldReader::parse(bytes)?;
    let mut value = T::default();
    value.read_fields(&reader)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::field_id;

    const A: FieldId = field_id("a");
    const B: FieldId = field_id("b");

    fn two_fields() -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.write(A, &7u32);
        w.write(B, &"hi".to_string());
        w.into_envelope()
    }

    #[test]
    fn test_empty_envelope_is_just_end_marker() {
        let bytes = FieldWriter::new().into_envelope();
        assert_eq!(bytes, vec![5, 0, 0, 0, 0, 0, 0, 0, 0]);
        let reader = FieldReader::parse(&bytes).unwrap();
        assert!(reader.is_empty());
    }

    #[test]
    fn test_record_layout() {
        let mut w = FieldWriter::new();
        w.write(A, &1u8);
        let bytes = w.into_envelope();
        // prefix(4) + id(4) + tag(1) + len(4) + value(1) + end(5)
        assert_eq!(bytes.len(), 19);
        assert_eq!(&bytes[0..4], &15u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &A.to_le_bytes());
        assert_eq!(bytes[8], WireKind::U8.tag());
        assert_eq!(&bytes[9..13], &1u32.to_le_bytes());
        assert_eq!(bytes[13], 1);
    }

    #[test]
    fn test_read_in_any_order() {
        let bytes = two_fields();
        let reader = FieldReader::parse(&bytes).unwrap();
        let mut b = String::new();
        let mut a = 0u32;
        reader.read(B, &mut b).unwrap();
        reader.read(A, &mut a).unwrap();
        assert_eq!((a, b.as_str()), (7, "hi"));
    }

    #[test]
    fn test_missing_field_keeps_slot() {
        let bytes = two_fields();
        let reader = FieldReader::parse(&bytes).unwrap();
        let mut c = 99u16;
        reader.read(field_id("c"), &mut c).unwrap();
        assert_eq!(c, 99);
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = two_fields();
        for cut in 0..bytes.len() {
            assert!(FieldReader::parse(&bytes[..cut]).is_err(), "cut at {cut} accepted");
        }
    }

    #[test]
    fn test_declared_length_beyond_input() {
        let mut bytes = two_fields();
        bytes[0..4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            FieldReader::parse(&bytes),
            Err(DecodeError::BadLength { declared: 1000, .. })
        ));
    }

    #[test]
    fn test_value_length_beyond_envelope() {
        let mut bytes = two_fields();
        // length of the first record's value
        bytes[9..13].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(FieldReader::parse(&bytes), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_missing_end_marker() {
        let mut w = FieldWriter::new();
        w.write(A, &1u8);
        let mut bytes = w.into_envelope();
        bytes.truncate(bytes.len() - 5);
        let body_len = (bytes.len() - 4) as u32;
        bytes[0..4].copy_from_slice(&body_len.to_le_bytes());
        assert_eq!(FieldReader::parse(&bytes).unwrap_err(), DecodeError::MissingEndMarker);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = two_fields();
        bytes.push(0xAA);
        assert_eq!(
            FieldReader::parse(&bytes).unwrap_err(),
            DecodeError::TrailingBytes { count: 1 }
        );
        let (_, consumed) = FieldReader::parse_prefix(&bytes).unwrap();
        assert_eq!(consumed, bytes.len() - 1);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut w = FieldWriter::new();
        w.write(A, &1u8);
        w.write(A, &2u8);
        let bytes = w.into_envelope();
        assert_eq!(
            FieldReader::parse(&bytes).unwrap_err(),
            DecodeError::DuplicateField { field: A }
        );
    }

    #[test]
    fn test_kind_mismatch_on_known_field() {
        let bytes = two_fields();
        let reader = FieldReader::parse(&bytes).unwrap();
        let mut wrong = 0u64;
        assert!(matches!(
            reader.read(A, &mut wrong),
            Err(DecodeError::KindMismatch { expected: WireKind::U64, actual: WireKind::U32, .. })
        ));
    }

    #[test]
    fn test_unknown_tag_skippable_until_read() {
        let mut bytes = two_fields();
        // retag the first record with a kind from the future
        bytes[8] = 0x7F;
        let reader = FieldReader::parse(&bytes).unwrap();
        let mut b = String::new();
        reader.read(B, &mut b).unwrap();
        assert_eq!(b, "hi");
        let mut a = 0u32;
        assert_eq!(
            reader.read(A, &mut a).unwrap_err(),
            DecodeError::UnknownTag { field: A, tag: 0x7F }
        );
    }
}
