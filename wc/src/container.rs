//! Containers: typed payloads exchanged in a conference

use crate::codec::Codec;
use crate::error::{DecodeError, DecodeResult};
use crate::structured::Structured;
use crate::timestamp::TimeStamp;

/// A structured type with a conference-wide data type identifier
pub trait DataType: Structured {
    const ID: u32;
}

crate::structured! {
    /// Envelope wrapping one encoded value plus its data type and timestamps
    ///
    /// Built by the sender and never modified afterwards, except that the
    /// receiving endpoint stamps `received`.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Container("Container") {
        data_type: u32 => "dataType",
        sent: TimeStamp => "sent",
        received: TimeStamp => "received",
        payload: Vec<u8> => "serializedData",
    }
}

impl Container {
    pub fn new(data_type: u32, sent: TimeStamp, payload: Vec<u8>) -> Self {
        Self {
            data_type,
            sent,
            received: TimeStamp::default(),
            payload,
        }
    }

    pub fn data_type(&self) -> u32 {
        self.data_type
    }

    pub fn sent(&self) -> TimeStamp {
        self.sent
    }

    pub fn received(&self) -> TimeStamp {
        self.received
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Copy of this container stamped with the local receive time
    pub fn with_received(mut self, received: TimeStamp) -> Self {
        self.received = received;
        self
    }

    /// Whether this container carries a `T`
    pub fn is<T: DataType>(&self) -> bool {
        self.data_type == T::ID
    }

    /// Decode the payload as `T`, checking the data type first
    pub fn unpack<T: DataType>(&self, codec: &Codec) -> DecodeResult<T> {
        if self.data_type != T::ID {
            return Err(DecodeError::WrongDataType {
                expected: T::ID,
                actual: self.data_type,
            });
        }
        codec.decode(&self.payload)
    }
}
