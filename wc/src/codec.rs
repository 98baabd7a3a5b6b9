//! Codec entry points

use tracing::{debug, trace};

use crate::container::{Container, DataType};
use crate::envelope::{FieldReader, FieldWriter};
use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::structured::Structured;
use crate::timestamp::TimeStamp;

/// Default upper bound for one encoded message (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Stateless encoder/decoder
///
/// Construct once at startup and pass it to whatever needs it. It is `Copy`
/// and holds no mutable state, so concurrent use is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    max_message_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Codec {
    /// Codec with a custom message size limit (capped at `u32::MAX`)
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        debug!(max_message_size, "Codec::with_max_message_size: called");
        Self {
            max_message_size: max_message_size.min(u32::MAX as usize),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encode a structured value into one envelope
    pub fn encode<T: Structured>(&self, value: &T) -> EncodeResult<Vec<u8>> {
        let mut writer = FieldWriter::new();
        value.write_fields(&mut writer);
        let bytes = writer.into_envelope();
        if bytes.len() > self.max_message_size {
            return Err(EncodeError::TooLarge {
                size: bytes.len(),
                limit: self.max_message_size,
            });
        }
        trace!(type_name = T::SHORT_NAME, len = bytes.len(), "Codec::encode");
        Ok(bytes)
    }

    /// Decode exactly one envelope into a structured value
    pub fn decode<T: Structured>(&self, bytes: &[u8]) -> DecodeResult<T> {
        if bytes.len() > self.max_message_size {
            return Err(DecodeError::TooLarge {
                size: bytes.len(),
                limit: self.max_message_size,
            });
        }
        let reader = FieldReader::parse(bytes)?;
        let skipped = reader
            .field_ids()
            .filter(|id| !T::FIELDS.iter().any(|f| f.id == *id))
            .count();
        if skipped > 0 {
            trace!(type_name = T::SHORT_NAME, skipped, "Codec::decode: skipping unknown fields");
        }
        let mut value = T::default();
        value.read_fields(&reader)?;
        Ok(value)
    }

    /// Wrap a typed value into a container stamped with `sent`
    pub fn pack<T: DataType>(&self, value: &T, sent: TimeStamp) -> EncodeResult<Container> {
        let payload = self.encode(value)?;
        Ok(Container::new(T::ID, sent, payload))
    }

    /// Serialize a whole container for the wire
    pub fn to_wire(&self, container: &Container) -> EncodeResult<Vec<u8>> {
        self.encode(container)
    }

    /// Parse a container received from the wire
    pub fn from_wire(&self, bytes: &[u8]) -> DecodeResult<Container> {
        self.decode(bytes)
    }
}
