//! Type-erased object codecs.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;

/// A decoded object as held by a transaction.
pub type AnyObject = Box<dyn Any + Send>;

/// Converts objects of one registered type to and from stored bytes.
///
/// Codecs are type-erased so a single registry can hold every type. The
/// absent object is `None` and always encodes to an empty byte string;
/// storing an empty byte string deletes the key.
pub trait ObjectCodec: Send + Sync + fmt::Debug {
    /// Name of the Rust type this codec produces.
    fn rust_type(&self) -> &'static str;

    /// `TypeId` of the Rust type this codec produces.
    fn object_type(&self) -> TypeId;

    /// Encodes an object; `None` encodes to an empty byte string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] if the object has the wrong type,
    /// or [`CodecError::EncodingFailed`] if serialization fails.
    fn encode(&self, object: Option<&dyn Any>) -> CodecResult<Vec<u8>>;

    /// Decodes stored bytes; an empty byte string decodes to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DecodingFailed`] for malformed bytes.
    fn decode(&self, bytes: &[u8]) -> CodecResult<Option<AnyObject>>;
}

/// Marker for types that can be stored with [`RecordCodec`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + 'static {}

/// Stores any serde type as CBOR.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use snapdb_codec::{ObjectCodec, RecordCodec};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Point { x: i32, y: i32 }
///
/// let codec = RecordCodec::<Point>::new();
/// let bytes = codec.encode(Some(&Point { x: 1, y: 2 })).unwrap();
/// let back = codec.decode(&bytes).unwrap().unwrap();
/// assert_eq!(back.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
/// ```
pub struct RecordCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> RecordCodec<T> {
    /// Creates the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for RecordCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RecordCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordCodec<{}>", type_name::<T>())
    }
}

impl<T: Record> ObjectCodec for RecordCodec<T> {
    fn rust_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn object_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn encode(&self, object: Option<&dyn Any>) -> CodecResult<Vec<u8>> {
        let Some(object) = object else {
            return Ok(Vec::new());
        };
        let record = object
            .downcast_ref::<T>()
            .ok_or_else(|| CodecError::type_mismatch(type_name::<T>()))?;
        let mut buf = Vec::new();
        ciborium::ser::into_writer(record, &mut buf)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Option<AnyObject>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let record: T = ciborium::de::from_reader(bytes)
            .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        Ok(Some(Box::new(record)))
    }
}

/// Stores a `String` as its raw UTF-8 bytes.
///
/// The empty string is indistinguishable from the absent object.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl ObjectCodec for StringCodec {
    fn rust_type(&self) -> &'static str {
        type_name::<String>()
    }

    fn object_type(&self) -> TypeId {
        TypeId::of::<String>()
    }

    fn encode(&self, object: Option<&dyn Any>) -> CodecResult<Vec<u8>> {
        match object {
            None => Ok(Vec::new()),
            Some(object) => object
                .downcast_ref::<String>()
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| CodecError::type_mismatch(type_name::<String>())),
        }
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Option<AnyObject>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let s = String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Some(Box::new(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        owner: String,
        balance: i64,
    }

    #[test]
    fn record_none_is_empty() {
        let codec = RecordCodec::<Account>::new();
        assert!(codec.encode(None).unwrap().is_empty());
        assert!(codec.decode(&[]).unwrap().is_none());
    }

    #[test]
    fn record_decodes_private_copy() {
        let codec = RecordCodec::<Account>::new();
        let account = Account {
            owner: "ann".into(),
            balance: 10,
        };
        let bytes = codec.encode(Some(&account)).unwrap();

        let mut first = codec.decode(&bytes).unwrap().unwrap();
        first.downcast_mut::<Account>().unwrap().balance = 99;
        let second = codec.decode(&bytes).unwrap().unwrap();
        assert_eq!(second.downcast_ref::<Account>(), Some(&account));
    }

    #[test]
    fn record_rejects_wrong_type() {
        let codec = RecordCodec::<Account>::new();
        let err = codec.encode(Some(&42u32)).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
        assert_ne!(codec.object_type(), TypeId::of::<u32>());
    }

    #[test]
    fn record_rejects_garbage() {
        let codec = RecordCodec::<Account>::new();
        assert!(matches!(
            codec.decode(&[0xff, 0x00]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn string_codec_is_raw_utf8() {
        let codec = StringCodec;
        let bytes = codec.encode(Some(&"hello".to_string())).unwrap();
        assert_eq!(bytes, b"hello");
        assert!(codec.encode(Some(&String::new())).unwrap().is_empty());
        assert_eq!(codec.decode(&[0xff]).unwrap_err(), CodecError::InvalidUtf8);
    }
}
