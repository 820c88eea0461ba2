//! CBOR decoder.

use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use serde::de::DeserializeOwned;

/// Decode a value from CBOR bytes.
///
/// Decoding is lenient about canonical form: any well-formed CBOR that
/// matches the target shape is accepted, so records written by older
/// encoders stay readable.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR, do not match `T`, or
/// are followed by trailing data.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = bytes;
    let value = ciborium::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(CodecError::decoding_failed(format!(
            "{} trailing bytes after value",
            reader.len()
        )));
    }
    Ok(value)
}

/// Decode CBOR bytes into an untyped [`ciborium::Value`] tree.
///
/// # Errors
///
/// Returns an error if the bytes are not a single well-formed CBOR item.
pub fn from_cbor_value(bytes: &[u8]) -> CodecResult<Value> {
    from_cbor(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::to_canonical_cbor;
    use std::collections::BTreeMap;

    #[test]
    fn decode_scalars() {
        assert_eq!(from_cbor::<u64>(&[0x18, 24]).unwrap(), 24);
        assert_eq!(from_cbor::<i64>(&[0x38, 99]).unwrap(), -100);
        assert!(from_cbor::<bool>(&[0xf5]).unwrap());
        assert_eq!(from_cbor::<Option<u8>>(&[0xf6]).unwrap(), None);
    }

    #[test]
    fn decode_accepts_non_canonical_integers() {
        // 5 written in the two-byte form.
        assert_eq!(from_cbor::<u8>(&[0x19, 0x00, 0x05]).unwrap(), 5);
    }

    #[test]
    fn decode_map_into_btree() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2u32);
        map.insert("a".to_string(), 1u32);
        let bytes = to_canonical_cbor(&map).unwrap();
        assert_eq!(from_cbor::<BTreeMap<String, u32>>(&bytes).unwrap(), map);
    }

    #[test]
    fn untyped_tree() {
        let value = from_cbor_value(&[0x82, 0x01, 0x61, b'x']).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Integer(1u8.into()), Value::Text("x".into())])
        );
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            from_cbor::<String>(&[0x65, b'h', b'e']),
            Err(CodecError::DecodingFailed { .. })
        ));
        assert!(from_cbor::<u8>(&[]).is_err());
    }

    #[test]
    fn trailing_bytes_fail() {
        assert!(matches!(
            from_cbor::<u8>(&[0x01, 0x02]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn shape_mismatch_fails() {
        let bytes = to_canonical_cbor("text").unwrap();
        assert!(from_cbor::<u32>(&bytes).is_err());
    }
}
