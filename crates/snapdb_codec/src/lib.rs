//! # SnapDB Codec
//!
//! Object codecs for SnapDB.
//!
//! Every registered type carries an [`ObjectCodec`] that turns decoded
//! objects into stored bytes and back. Link sets are stored with
//! [`encode_links`] / [`decode_links`].
//!
//! ## Conventions
//!
//! - The absent object encodes to an empty byte string
//! - An empty byte string decodes to the absent object
//! - Decoding always produces a fresh, privately owned object
//!
//! ## Usage
//!
//! ```
//! use snapdb_codec::{decode_links, encode_links, ObjectCodec, StringCodec};
//!
//! let bytes = StringCodec.encode(Some(&"hi".to_string())).unwrap();
//! assert_eq!(bytes, b"hi");
//!
//! let links = encode_links(&["a".to_string(), "b".to_string()]).unwrap();
//! assert_eq!(decode_links(&links).unwrap(), vec!["a", "b"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod links;

pub use codec::{AnyObject, ObjectCodec, Record, RecordCodec, StringCodec};
pub use error::{CodecError, CodecResult};
pub use links::{decode_links, encode_links};
