//! Structured values: types that walk their fields by identifier
//!
//! Implement [`Structured`] by hand, or declare the type with
//! [`structured!`](crate::structured), which lists every field once as
//! `(name, value)` and generates both directions of the walk plus a
//! [`FieldValue`](crate::FieldValue) impl so the type nests inside others.

use crate::envelope::{FieldReader, FieldWriter};
use crate::error::DecodeResult;
use crate::field::FieldInfo;

/// A value encoded as one envelope of field records
pub trait Structured: Default {
    /// Short type name used in diagnostics
    const SHORT_NAME: &'static str;

    /// Fields in declaration order
    const FIELDS: &'static [FieldInfo];

    /// Write every field in declaration order
    fn write_fields(&self, writer: &mut FieldWriter);

    /// Assign every field found in `reader`; absent fields keep their value
    fn read_fields(&mut self, reader: &FieldReader<'_>) -> DecodeResult<()>;
}

/// Declare a struct together with its [`Structured`] field walk.
///
/// ```ignore
/// structured! {
///     #[derive(Debug, Clone, Default, PartialEq)]
///     pub struct Vertex3("Vertex3") {
///         pub x: f64 => "x",
///         pub y: f64 => "y",
///         pub z: f64 => "z",
///     }
/// }
/// ```
///
/// Field identifiers are the CRC-32 of the quoted names and are computed at
/// compile time; duplicate or reserved identifiers fail the build.
#[macro_export]
macro_rules! structured {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($short:literal) {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $fty:ty => $fname:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $fty,
            )*
        }

        const _: () = $crate::field::assert_unique_names(&[$($fname),*]);

        impl $crate::Structured for $name {
            const SHORT_NAME: &'static str = $short;

            const FIELDS: &'static [$crate::FieldInfo] = &[
                $(
                    $crate::FieldInfo {
                        id: $crate::field::checked_field_id($fname),
                        name: $fname,
                        kind: <$fty as $crate::FieldValue>::KIND,
                    },
                )*
            ];

            #[allow(unused_variables)]
            fn write_fields(&self, writer: &mut $crate::FieldWriter) {
                $(
                    writer.write(const { $crate::field::checked_field_id($fname) }, &self.$field);
                )*
            }

            #[allow(unused_variables)]
            fn read_fields(&mut self, reader: &$crate::FieldReader<'_>) -> $crate::DecodeResult<()> {
                $(
                    reader.read(const { $crate::field::checked_field_id($fname) }, &mut self.$field)?;
                )*
                Ok(())
            }
        }

        impl $crate::FieldValue for $name {
            const KIND: $crate::WireKind = $crate::WireKind::Nested;

            fn encode_value(&self, out: &mut Vec<u8>) {
                $crate::envelope::encode_nested(self, out)
            }

            fn decode_value(bytes: &[u8]) -> $crate::DecodeResult<Self> {
                $crate::envelope::decode_nested(bytes)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{Codec, DecodeError, FieldValue, FieldWriter, Structured, WireKind, field_id};

    structured! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Inner("Inner") {
            tag: String => "tag",
            weight: f32 => "weight",
        }
    }

    structured! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Outer("Outer") {
            id: u64 => "id",
            inner: Inner => "inner",
            note: Option<String> => "note",
        }
    }

    structured! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Nothing("Nothing") {}
    }

    #[test]
    fn test_fields_metadata() {
        assert_eq!(Outer::SHORT_NAME, "Outer");
        let names: Vec<_> = Outer::FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names, ["id", "inner", "note"]);
        assert_eq!(Outer::FIELDS[0].id, field_id("id"));
        assert_eq!(Outer::FIELDS[1].kind, WireKind::Nested);
        assert_eq!(Outer::FIELDS[2].kind, WireKind::Text);
        assert_eq!(Inner::KIND, WireKind::Nested);
    }

    #[test]
    fn test_nested_roundtrip() {
        let codec = Codec::default();
        let value = Outer {
            id: 42,
            inner: Inner {
                tag: "rect".into(),
                weight: 0.5,
            },
            note: Some("front".into()),
        };
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode::<Outer>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_none_is_not_written() {
        let codec = Codec::default();
        let with = codec.encode(&Outer { note: Some(String::new()), ..Default::default() }).unwrap();
        let without = codec.encode(&Outer::default()).unwrap();
        assert!(with.len() > without.len());
        assert_eq!(codec.decode::<Outer>(&without).unwrap().note, None);
        assert_eq!(codec.decode::<Outer>(&with).unwrap().note, Some(String::new()));
    }

    #[test]
    fn test_empty_type() {
        let codec = Codec::default();
        let bytes = codec.encode(&Nothing {}).unwrap();
        assert_eq!(codec.decode::<Nothing>(&bytes).unwrap(), Nothing {});
    }

    #[test]
    fn test_malformed_nested_value() {
        let mut w = FieldWriter::new();
        w.write(field_id("id"), &1u64);
        // a nested record whose payload is not an envelope
        let mut garbage = Vec::new();
        3u8.encode_value(&mut garbage);
        struct Raw(Vec<u8>);
        impl FieldValue for Raw {
            const KIND: WireKind = WireKind::Nested;
            fn encode_value(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.0);
            }
            fn decode_value(bytes: &[u8]) -> crate::DecodeResult<Self> {
                Ok(Raw(bytes.to_vec()))
            }
        }
        w.write(field_id("inner"), &Raw(garbage));
        let bytes = w.into_envelope();
        let err = Codec::default().decode::<Outer>(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }
}
