//! Small BSON helpers shared by the command builders and wire-size accounting used for bulk
//! write batching.

use std::time::Duration;

use bson::{doc, oid::ObjectId, Bson, Document};
use serde::{ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ErrorKind, Result};

/// Coerces numeric BSON types into an `i64` if it would be lossless to do so. Returns `None` if
/// this value is not numeric or the conversion would be lossy (e.g. `1.5 -> 1`).
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if f == f as i64 as f64 => Some(f as i64),
        _ => None,
    }
}

pub(crate) fn add_id(doc: &mut Document) {
    doc.entry("_id".to_string())
        .or_insert_with(|| Bson::ObjectId(ObjectId::new()));
}

pub(crate) fn to_bson_array(docs: &[Document]) -> Bson {
    Bson::Array(docs.iter().map(|doc| Bson::Document(doc.clone())).collect())
}

pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

/// A replacement document's first key must not start with `$` — otherwise it would be parsed as
/// an update modifier rather than a literal replacement.
pub(crate) fn replacement_document_check(replacement: &Document) -> Result<()> {
    match first_key(replacement) {
        Some(s) if !s.starts_with('$') => Ok(()),
        _ => Err(ErrorKind::InvalidArgument {
            message: "replacement document must have first key not starting with '$'".to_string(),
        }
        .into()),
    }
}

/// An update document's first key must start with `$`.
pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    match first_key(update) {
        Some(s) if s.starts_with('$') => Ok(()),
        _ => Err(ErrorKind::InvalidArgument {
            message: "update document must have first key starting with '$'".to_string(),
        }
        .into()),
    }
}

pub(crate) fn serialize_duration_as_i64_millis<S: Serializer>(
    val: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(duration) => serializer.serialize_i64(duration.as_millis() as i64),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn deserialize_duration_from_u64_millis<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = Option::<u64>::deserialize(deserializer)?;
    Ok(millis.map(Duration::from_millis))
}

pub(crate) fn serialize_u32_as_i32<S: Serializer>(
    val: &Option<u32>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(val) if *val <= i32::MAX as u32 => serializer.serialize_i32(*val as i32),
        None => serializer.serialize_none(),
        _ => Err(ser::Error::custom("u32 specified does not fit into an i32")),
    }
}

pub(crate) fn serialize_batch_size<S: Serializer>(
    val: &Option<u32>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(val) if *val <= i32::MAX as u32 => {
            (doc! { "batchSize": (*val as i32) }).serialize(serializer)
        }
        None => Document::new().serialize(serializer),
        _ => Err(ser::Error::custom(
            "batch size must fit into a signed 32-bit integer",
        )),
    }
}

/// The serialized size in bytes of a document, computed without actually serializing it. Used to
/// decide when a batch of write models must be split to stay under `maxBsonObjectSize` without
/// paying for a full encode pass per candidate element.
pub(crate) fn doc_size_bytes(doc: &Document) -> usize {
    4 + doc
        .into_iter()
        .map(|(key, val)| 1 + key.len() + 1 + size_bytes(val))
        .sum::<usize>()
        + 1
}

pub(crate) fn size_bytes(val: &Bson) -> usize {
    match val {
        Bson::Double(_) => 8,
        Bson::String(s) => 4 + s.len() + 1,
        Bson::Array(arr) => {
            4 + arr
                .iter()
                .enumerate()
                .map(|(i, val)| 1 + num_decimal_digits(i) + 1 + size_bytes(val))
                .sum::<usize>()
                + 1
        }
        Bson::Document(doc) => doc_size_bytes(doc),
        Bson::Boolean(_) => 1,
        Bson::Null => 0,
        Bson::RegularExpression(regex) => regex.pattern.len() + 1 + regex.options.len() + 1,
        Bson::JavaScriptCode(code) => 4 + code.len() + 1,
        Bson::JavaScriptCodeWithScope(code_with_scope) => {
            4 + 4 + code_with_scope.code.len() + 1 + doc_size_bytes(&code_with_scope.scope)
        }
        Bson::Int32(_) => 4,
        Bson::Int64(_) => 8,
        Bson::Timestamp(_) => 8,
        Bson::Binary(bin) => 4 + 1 + bin.bytes.len(),
        Bson::ObjectId(_) => 12,
        Bson::DateTime(_) => 8,
        Bson::Symbol(s) => 4 + s.len() + 1,
        Bson::Decimal128(_) => 16,
        Bson::Undefined | Bson::MaxKey | Bson::MinKey => 0,
        Bson::DbPointer(_) => 4 + 1 + 12,
    }
}

fn num_decimal_digits(n: usize) -> usize {
    let mut digits = 1;
    let mut curr = 10;

    while curr < n {
        curr = match curr.checked_mul(10) {
            Some(val) => val,
            None => break,
        };
        digits += 1;
    }

    digits
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::*;

    #[test]
    fn doc_size_bytes_matches_serialized_size() {
        let doc = doc! {
            "double": -12.3,
            "string": "foo",
            "array": ["foobar", -7, Bson::Null, false],
            "document": { "x": 1, "y": "z" },
            "bool": true,
            "null": Bson::Null,
            "i32": 12i32,
            "i64": -126i64,
            "objectid": ObjectId::new(),
        };

        let mut serialized = Vec::new();
        doc.to_writer(&mut serialized).unwrap();

        assert_eq!(doc_size_bytes(&doc), serialized.len());
    }

    #[test]
    fn replacement_document_rejects_update_operators() {
        assert!(replacement_document_check(&doc! { "$set": { "a": 1 } }).is_err());
        assert!(replacement_document_check(&doc! { "a": 1 }).is_ok());
    }

    #[test]
    fn update_document_requires_operator() {
        assert!(update_document_check(&doc! { "a": 1 }).is_err());
        assert!(update_document_check(&doc! { "$set": { "a": 1 } }).is_ok());
    }

    #[test]
    fn get_int_rejects_lossy_float() {
        assert_eq!(get_int(&Bson::Double(2.0)), Some(2));
        assert_eq!(get_int(&Bson::Double(2.5)), None);
        assert_eq!(get_int(&Bson::Int32(7)), Some(7));
    }
}
