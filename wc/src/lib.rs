//! WireCodec - field-tagged binary serialization for conference containers
//!
//! Every value crossing a process boundary is encoded as a self-describing
//! envelope. Fields are located by a 32-bit identifier derived from the
//! field's short name (CRC-32), never by position, so independently versioned
//! senders and receivers interoperate:
//!
//! - fields a receiver does not know are skipped using their declared length
//! - fields a receiver expects but the sender omitted keep their default value
//!
//! # Wire format
//!
//! ```text
//! envelope := body_len:u32le body
//! body     := record* end
//! record   := field_id:u32le type_tag:u8 value_len:u32le value[value_len]
//! end      := 00 00 00 00 00
//! ```
//!
//! Numbers are little-endian and fixed width. A nested structured value is a
//! complete envelope stored as the value of its record.
//!
//! # Example
//!
//! ```ignore
//! use wirecodec::{Codec, structured};
//!
//! structured! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct Sample("Sample") {
//!         pub value: u32 => "value",
//!         pub label: String => "label",
//!     }
//! }
//!
//! let codec = Codec::default();
//! let bytes = codec.encode(&Sample { value: 7, label: "seven".into() })?;
//! let back: Sample = codec.decode(&bytes)?;
//! ```

mod codec;
mod container;
pub mod envelope;
mod error;
pub mod field;
mod structured;
mod timestamp;
mod value;

pub use codec::{Codec, DEFAULT_MAX_MESSAGE_SIZE};
pub use container::{Container, DataType};
pub use envelope::{FieldReader, FieldWriter};
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
pub use field::{FieldId, FieldInfo, field_id};
pub use structured::Structured;
pub use timestamp::TimeStamp;
pub use value::{FieldValue, WireKind};
