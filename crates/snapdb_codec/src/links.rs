//! Encoding of link key lists.

use crate::error::{CodecError, CodecResult};

/// Encodes a sorted list of link keys as a CBOR array.
///
/// The empty list encodes to an empty byte string.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn encode_links(keys: &[String]) -> CodecResult<Vec<u8>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::new();
    ciborium::ser::into_writer(keys, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a link key list; an empty byte string is the empty list.
///
/// Keys are returned sorted and deduplicated.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for malformed bytes.
pub fn decode_links(bytes: &[u8]) -> CodecResult<Vec<String>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut keys: Vec<String> = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    keys.sort();
    keys.dedup();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_empty_bytes() {
        assert!(encode_links(&[]).unwrap().is_empty());
        assert!(decode_links(&[]).unwrap().is_empty());
    }

    #[test]
    fn decode_normalizes_order() {
        let bytes = encode_links(&["b".into(), "a".into(), "b".into()]).unwrap();
        assert_eq!(decode_links(&bytes).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn decode_rejects_non_list() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&42u32, &mut bytes).unwrap();
        assert!(matches!(
            decode_links(&bytes),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}
