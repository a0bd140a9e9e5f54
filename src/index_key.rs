//! Encodings from typed values into `IndexKey` byte strings whose
//! lexicographic order matches the intended semantic order, plus the
//! composite-key scheme secondary indexes use to preserve B+Tree key
//! uniqueness under duplicate logical values.

use crate::types::{DocumentId, IndexKey};
use ordered_float::OrderedFloat;

/// Tag byte disambiguating encoded types inside a single index, so mixed-type
/// fields still compare consistently (numbers before strings, etc).
#[repr(u8)]
enum TypeTag {
    Bool = 0,
    I32 = 1,
    I64 = 2,
    F64 = 3,
    Str = 4,
    Bytes = 5,
}

fn tagged(tag: TypeTag, body: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut out = vec![tag as u8];
    body(&mut out);
    out
}

/// Flips the sign bit so two's-complement integers sort correctly as
/// unsigned big-endian byte strings.
fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1u64 << 63)).to_be_bytes()
}

fn encode_i32(v: i32) -> [u8; 4] {
    ((v as u32) ^ (1u32 << 31)).to_be_bytes()
}

/// IEEE-754 bit trick: flip the sign bit for positive numbers, flip every bit
/// for negative ones, so big-endian byte order matches numeric order.
fn encode_f64(v: f64) -> [u8; 8] {
    let bits = OrderedFloat(v).into_inner().to_bits();
    let flipped = if bits & (1u64 << 63) != 0 { !bits } else { bits | (1u64 << 63) };
    flipped.to_be_bytes()
}

#[must_use]
pub fn encode_bool(v: bool) -> IndexKey {
    IndexKey::Bytes(tagged(TypeTag::Bool, |b| b.push(u8::from(v))))
}

#[must_use]
pub fn encode_i32_key(v: i32) -> IndexKey {
    IndexKey::Bytes(tagged(TypeTag::I32, |b| b.extend_from_slice(&encode_i32(v))))
}

#[must_use]
pub fn encode_i64_key(v: i64) -> IndexKey {
    IndexKey::Bytes(tagged(TypeTag::I64, |b| b.extend_from_slice(&encode_i64(v))))
}

#[must_use]
pub fn encode_f64_key(v: f64) -> IndexKey {
    IndexKey::Bytes(tagged(TypeTag::F64, |b| b.extend_from_slice(&encode_f64(v))))
}

#[must_use]
pub fn encode_str_key(v: &str) -> IndexKey {
    IndexKey::Bytes(tagged(TypeTag::Str, |b| b.extend_from_slice(v.as_bytes())))
}

#[must_use]
pub fn encode_bytes_key(v: &[u8]) -> IndexKey {
    IndexKey::Bytes(tagged(TypeTag::Bytes, |b| b.extend_from_slice(v)))
}

/// Encodes a BSON scalar into an `IndexKey`, or `None` for types that have no
/// defined ordering contract (documents, arrays, null, etc).
#[must_use]
pub fn encode_bson(value: &bson::Bson) -> Option<IndexKey> {
    match value {
        bson::Bson::Boolean(b) => Some(encode_bool(*b)),
        bson::Bson::Int32(i) => Some(encode_i32_key(*i)),
        bson::Bson::Int64(i) => Some(encode_i64_key(*i)),
        bson::Bson::Double(f) => Some(encode_f64_key(*f)),
        bson::Bson::String(s) => Some(encode_str_key(s)),
        bson::Bson::Binary(bin) => Some(encode_bytes_key(&bin.bytes)),
        _ => None,
    }
}

#[must_use]
pub fn encode_document_id(id: DocumentId) -> Vec<u8> {
    id.0.as_bytes().to_vec()
}

pub const MIN_ID_BYTES: [u8; 16] = [0x00; 16];
pub const MAX_ID_BYTES: [u8; 16] = [0xFF; 16];

/// Secondary-index composite key: `encode(field) || encode(primary_id)`.
/// Preserves B+Tree key uniqueness while letting several documents share the
/// same logical field value.
#[must_use]
pub fn composite_key(field_key: &IndexKey, id: DocumentId) -> IndexKey {
    let mut bytes = field_key.as_bytes().to_vec();
    bytes.extend_from_slice(&encode_document_id(id));
    IndexKey::Bytes(bytes)
}

/// The `[lower, upper]` composite-key range matching every document whose
/// secondary field equals `field_key` (§4.6's point-lookup-as-range trick).
#[must_use]
pub fn composite_range(field_key: &IndexKey) -> (IndexKey, IndexKey) {
    let mut lower = field_key.as_bytes().to_vec();
    lower.extend_from_slice(&MIN_ID_BYTES);
    let mut upper = field_key.as_bytes().to_vec();
    upper.extend_from_slice(&MAX_ID_BYTES);
    (IndexKey::Bytes(lower), IndexKey::Bytes(upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_order_matches_byte_order() {
        let mut values = vec![-5i64, 100, 0, i64::MIN, i64::MAX, -1];
        let mut keys: Vec<_> = values.iter().map(|v| encode_i64_key(*v)).collect();
        values.sort_unstable();
        keys.sort();
        let decoded: Vec<i64> = keys
            .iter()
            .map(|k| {
                let b = k.as_bytes();
                let flipped = u64::from_be_bytes(b[1..9].try_into().unwrap());
                (flipped ^ (1u64 << 63)) as i64
            })
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn float_order_matches_numeric_order() {
        let values = vec![-3.5f64, 0.0, 2.25, -0.5, 100.0, -100.0];
        let mut keys: Vec<_> = values.iter().map(|v| encode_f64_key(*v)).collect();
        keys.sort();
        let mut sorted_values = values;
        sorted_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (k, v) in keys.iter().zip(sorted_values.iter()) {
            assert_eq!(*k, encode_f64_key(*v));
        }
    }

    #[test]
    fn string_order_matches_lexicographic_order() {
        let a = encode_str_key("apple");
        let b = encode_str_key("banana");
        assert!(a < b);
    }

    #[test]
    fn composite_range_matches_same_value_pair() {
        let key = encode_i64_key(30);
        let id_a = DocumentId::new();
        let id_b = DocumentId::new();
        let (lo, hi) = composite_range(&key);
        let ca = composite_key(&key, id_a);
        let cb = composite_key(&key, id_b);
        assert!(lo <= ca && ca <= hi);
        assert!(lo <= cb && cb <= hi);
    }
}
