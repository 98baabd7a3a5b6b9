//! Codec error types

use thiserror::Error;

use crate::field::FieldId;
use crate::value::WireKind;

/// Result alias for decoding operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Result alias for encoding operations
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Errors raised while decoding wire data
///
/// Every variant is recoverable: the caller discards the offending message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Envelope declares {declared} body bytes but only {available} are available")]
    BadLength { declared: usize, available: usize },

    #[error("Envelope has no end marker")]
    MissingEndMarker,

    #[error("{count} trailing bytes after end of envelope")]
    TrailingBytes { count: usize },

    #[error("Reserved field id 0 used with type tag {tag:#04x}")]
    ReservedFieldId { tag: u8 },

    #[error("Field {field:#010x} appears more than once")]
    DuplicateField { field: FieldId },

    #[error("Field {field:#010x} has unknown type tag {tag:#04x}")]
    UnknownTag { field: FieldId, tag: u8 },

    #[error("Field {field:#010x} is {actual:?}, expected {expected:?}")]
    KindMismatch {
        field: FieldId,
        expected: WireKind,
        actual: WireKind,
    },

    #[error("{kind:?} value is {actual} bytes wide, expected {expected}")]
    BadWidth {
        kind: WireKind,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid {what} value {value}")]
    InvalidValue { what: &'static str, value: u64 },

    #[error("Text field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Container carries data type {actual}, expected {expected}")]
    WrongDataType { expected: u32, actual: u32 },
}

/// Errors raised while encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Encoded message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_messages_name_the_field() {
        let err = DecodeError::KindMismatch {
            field: 0xDEAD_BEEF,
            expected: WireKind::U32,
            actual: WireKind::Text,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("U32"));
        assert!(msg.contains("Text"));
    }

    #[test]
    fn test_truncated_message() {
        let err = DecodeError::Truncated {
            offset: 9,
            needed: 4,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Truncated input at offset 9: needed 4 bytes, 1 available"
        );
    }
}
