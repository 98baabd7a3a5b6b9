//! Primitive field values and their type tags

use crate::error::{DecodeError, DecodeResult};

/// Type discriminator written with every field record
///
/// Tag `0` is reserved for the end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireKind {
    Bool = 1,
    I8 = 2,
    U8 = 3,
    I16 = 4,
    U16 = 5,
    I32 = 6,
    U32 = 7,
    I64 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
    Text = 12,
    Bytes = 13,
    Nested = 14,
}

impl WireKind {
    /// Tag byte for this kind
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Kind for a tag byte, if known
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => WireKind::Bool,
            2 => WireKind::I8,
            3 => WireKind::U8,
            4 => WireKind::I16,
            5 => WireKind::U16,
            6 => WireKind::I32,
            7 => WireKind::U32,
            8 => WireKind::I64,
            9 => WireKind::U64,
            10 => WireKind::F32,
            11 => WireKind::F64,
            12 => WireKind::Text,
            13 => WireKind::Bytes,
            14 => WireKind::Nested,
            _ => return None,
        })
    }
}

/// A value that can be stored in a single field record
pub trait FieldValue: Sized {
    /// Type tag written on the wire
    const KIND: WireKind;

    /// Append the value bytes (without record header) to `out`
    fn encode_value(&self, out: &mut Vec<u8>);

    /// Decode the value bytes of one record
    fn decode_value(bytes: &[u8]) -> DecodeResult<Self>;

    /// Absent values are not written at all, so receivers keep their default
    fn is_present(&self) -> bool {
        true
    }
}

macro_rules! fixed_width_value {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                const KIND: WireKind = WireKind::$kind;

                fn encode_value(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
                    const WIDTH: usize = std::mem::size_of::<$ty>();
                    let raw: [u8; WIDTH] = bytes.try_into().map_err(|_| DecodeError::BadWidth {
                        kind: WireKind::$kind,
                        expected: WIDTH,
                        actual: bytes.len(),
                    })?;
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

fixed_width_value! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl FieldValue for bool {
    const KIND: WireKind = WireKind::Bool;

    fn encode_value(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(DecodeError::InvalidValue {
                what: "bool",
                value: u64::from(*other),
            }),
            _ => Err(DecodeError::BadWidth {
                kind: WireKind::Bool,
                expected: 1,
                actual: bytes.len(),
            }),
        }
    }
}

impl FieldValue for String {
    const KIND: WireKind = WireKind::Text;

    fn encode_value(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl FieldValue for Vec<u8> {
    const KIND: WireKind = WireKind::Bytes;

    fn encode_value(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const KIND: WireKind = T::KIND;

    fn encode_value(&self, out: &mut Vec<u8>) {
        if let Some(value) = self {
            value.encode_value(out);
        }
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        T::decode_value(bytes).map(Some)
    }

    fn is_present(&self) -> bool {
        self.is_some()
    }
}
