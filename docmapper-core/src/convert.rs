//! Storage-native value conversion.

use bson::{Bson, oid::ObjectId};
use chrono::Utc;

use crate::mapping::TypeTag;

/// Converts property-space scalars into their storage-native form.
///
/// Implementations must be idempotent: converting an already converted value
/// returns it unchanged. Values that cannot be converted are passed through.
pub trait ValueConverter: Send + Sync {
    /// Converts `value` according to `type_tag`. `None` means no typed conversion.
    fn to_storage(&self, type_tag: Option<TypeTag>, value: Bson) -> Bson;
}

/// The default converter, covering the BSON-native representations of every [`TypeTag`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeValueConverter;

impl ValueConverter for NativeValueConverter {
    fn to_storage(&self, type_tag: Option<TypeTag>, value: Bson) -> Bson {
        let Some(tag) = type_tag else {
            return value;
        };

        match (tag, value) {
            (_, Bson::Array(items)) => Bson::Array(
                items
                    .into_iter()
                    .map(|item| self.to_storage(Some(tag), item))
                    .collect(),
            ),
            (TypeTag::Id, Bson::String(hex)) => match ObjectId::parse_str(&hex) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => Bson::String(hex),
            },
            (TypeTag::Uuid, Bson::String(text)) => match uuid::Uuid::parse_str(&text) {
                Ok(uuid) => Bson::from(bson::Uuid::from_bytes(uuid.into_bytes())),
                Err(_) => Bson::String(text),
            },
            (TypeTag::Date, Bson::String(text)) => match chrono::DateTime::parse_from_rfc3339(&text) {
                Ok(parsed) => Bson::DateTime(bson::DateTime::from_chrono(parsed.with_timezone(&Utc))),
                Err(_) => Bson::String(text),
            },
            (TypeTag::Date, Bson::Int64(millis)) => Bson::DateTime(bson::DateTime::from_millis(millis)),
            (TypeTag::Int, Bson::Double(number)) if number.fract() == 0.0 => Bson::Int64(number as i64),
            (TypeTag::Int, Bson::String(text)) => match text.parse::<i64>() {
                Ok(number) => Bson::Int64(number),
                Err(_) => Bson::String(text),
            },
            (TypeTag::Float, Bson::Int32(number)) => Bson::Double(number as f64),
            (TypeTag::Float, Bson::Int64(number)) => Bson::Double(number as f64),
            (TypeTag::String, Bson::ObjectId(oid)) => Bson::String(oid.to_hex()),
            (TypeTag::String, Bson::Int32(number)) => Bson::String(number.to_string()),
            (TypeTag::String, Bson::Int64(number)) => Bson::String(number.to_string()),
            (TypeTag::Bool, Bson::Int32(number)) => Bson::Boolean(number != 0),
            (TypeTag::Bool, Bson::Int64(number)) => Bson::Boolean(number != 0),
            (_, other) => other,
        }
    }
}

/// Current time as a storage date.
pub fn now() -> bson::DateTime {
    bson::DateTime::from_chrono(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_strings_become_object_ids() {
        let oid = ObjectId::new();
        let converted = NativeValueConverter.to_storage(Some(TypeTag::Id), Bson::String(oid.to_hex()));

        assert_eq!(converted, Bson::ObjectId(oid));
        assert_eq!(
            NativeValueConverter.to_storage(Some(TypeTag::Id), converted.clone()),
            converted
        );
    }

    #[test]
    fn arrays_are_converted_element_wise() {
        let converted = NativeValueConverter.to_storage(
            Some(TypeTag::Int),
            Bson::Array(vec![Bson::String("4".into()), Bson::Double(2.0)]),
        );

        assert_eq!(converted, Bson::Array(vec![Bson::Int64(4), Bson::Int64(2)]));
    }

    #[test]
    fn dates_parse_rfc3339() {
        let converted = NativeValueConverter.to_storage(
            Some(TypeTag::Date),
            Bson::String("2024-01-02T03:04:05Z".into()),
        );

        assert_eq!(
            converted,
            Bson::DateTime(bson::DateTime::from_millis(1_704_164_645_000))
        );
    }

    #[test]
    fn untagged_and_unparseable_values_pass_through() {
        assert_eq!(
            NativeValueConverter.to_storage(None, Bson::String("abc".into())),
            Bson::String("abc".into())
        );
        assert_eq!(
            NativeValueConverter.to_storage(Some(TypeTag::Uuid), Bson::String("abc".into())),
            Bson::String("abc".into())
        );
    }
}
