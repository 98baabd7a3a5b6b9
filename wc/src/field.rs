//! Field identifiers
//!
//! A field identifier is the CRC-32 (IEEE) of the field's short name, computed
//! at compile time. Identifier `0` is reserved for the envelope end marker.

use crate::value::WireKind;

/// Numeric key of a field inside an envelope
pub type FieldId = u32;

/// Identifier reserved for the end-of-envelope marker
pub const END_MARKER: FieldId = 0;

const CRC32_POLY: u32 = 0xEDB8_8320;

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC32_POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32 (reflected, init and xorout `0xFFFFFFFF`)
pub const fn crc32(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    let mut i = 0;
    while i < bytes.len() {
        let index = ((crc ^ bytes[i] as u32) & 0xFF) as usize;
        crc = CRC32_TABLE[index] ^ (crc >> 8);
        i += 1;
    }
    crc ^ 0xFFFF_FFFF
}

/// Identifier of the field with the given short name
pub const fn field_id(name: &str) -> FieldId {
    crc32(name.as_bytes())
}

/// Like [`field_id`], but refuses names that hash to the end marker.
///
/// Used by `structured!` inside const contexts so a bad name fails the build.
pub const fn checked_field_id(name: &str) -> FieldId {
    let id = field_id(name);
    assert!(id != END_MARKER, "field name hashes to the reserved end marker id");
    id
}

/// Compile-time check that no two field names of one type share an identifier.
pub const fn assert_unique_names(names: &[&str]) {
    let mut i = 0;
    while i < names.len() {
        let id = checked_field_id(names[i]);
        let mut j = i + 1;
        while j < names.len() {
            assert!(id != checked_field_id(names[j]), "duplicate field identifier in structured type");
            j += 1;
        }
        i += 1;
    }
}

/// Static description of one field of a structured type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: FieldId,
    pub name: &'static str,
    pub kind: WireKind,
}
