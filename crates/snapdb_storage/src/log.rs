//! Frame format of the persistent batch log.
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | length (4) | payload (length) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers header and payload.
//! A truncated trailing frame marks the end of the log; a CRC mismatch is
//! corruption.

use crate::backend::TypeTags;
use crate::error::{StorageError, StorageResult};
use crate::versioned::{BatchOp, WriteBatch};
use std::collections::BTreeMap;

/// Magic bytes at the start of every frame.
pub(crate) const LOG_MAGIC: [u8; 4] = *b"SDBL";

/// Current frame format version.
pub(crate) const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FrameKind {
    /// Tags allocated to a type.
    Type = 1,
    /// A committed write batch.
    Batch = 2,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Type),
            2 => Some(Self::Batch),
            _ => None,
        }
    }
}

/// A decoded log frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A type registration.
    Type {
        /// Type name.
        name: String,
        /// Tags allocated so far.
        tags: TypeTags,
    },
    /// A committed batch.
    Batch {
        /// Commit snapshot id.
        snapshot: u64,
        /// Applied operations.
        batch: WriteBatch,
    },
}

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_ADD_INDEX: u8 = 3;
const OP_REMOVE_INDEX: u8 = 4;

impl Frame {
    fn kind(&self) -> FrameKind {
        match self {
            Self::Type { .. } => FrameKind::Type,
            Self::Batch { .. } => FrameKind::Batch,
        }
    }

    /// Encodes the frame including header and CRC.
    pub(crate) fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut payload = Vec::new();
        match self {
            Self::Type { name, tags } => {
                put_bytes(&mut payload, name.as_bytes())?;
                payload.extend_from_slice(&tags.type_tag.to_le_bytes());
                put_len(&mut payload, tags.link_tags.len())?;
                for (link, tag) in &tags.link_tags {
                    put_bytes(&mut payload, link.as_bytes())?;
                    payload.extend_from_slice(&tag.to_le_bytes());
                }
            }
            Self::Batch { snapshot, batch } => {
                payload.extend_from_slice(&snapshot.to_le_bytes());
                put_len(&mut payload, batch.len())?;
                for op in batch.ops() {
                    match op {
                        BatchOp::Put { key, value } => {
                            payload.push(OP_PUT);
                            put_bytes(&mut payload, key)?;
                            put_bytes(&mut payload, value)?;
                        }
                        BatchOp::Delete { key } => {
                            payload.push(OP_DELETE);
                            put_bytes(&mut payload, key)?;
                        }
                        BatchOp::AddIndex { target, source } => {
                            payload.push(OP_ADD_INDEX);
                            put_bytes(&mut payload, target)?;
                            put_bytes(&mut payload, source.as_bytes())?;
                        }
                        BatchOp::RemoveIndex { target, source } => {
                            payload.push(OP_REMOVE_INDEX);
                            put_bytes(&mut payload, target)?;
                            put_bytes(&mut payload, source.as_bytes())?;
                        }
                    }
                }
            }
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(self.kind() as u8);
        put_len(&mut buf, payload.len())?;
        buf.extend_from_slice(&payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    fn decode_payload(kind: FrameKind, payload: &[u8]) -> StorageResult<Self> {
        let mut cursor = Cursor::new(payload);
        let frame = match kind {
            FrameKind::Type => {
                let name = cursor.string()?;
                let type_tag = cursor.u16()?;
                let count = cursor.u32()?;
                let mut link_tags = BTreeMap::new();
                for _ in 0..count {
                    let link = cursor.string()?;
                    let tag = cursor.u16()?;
                    link_tags.insert(link, tag);
                }
                Self::Type {
                    name,
                    tags: TypeTags {
                        type_tag,
                        link_tags,
                    },
                }
            }
            FrameKind::Batch => {
                let snapshot = cursor.u64()?;
                let count = cursor.u32()?;
                let mut batch = WriteBatch::new();
                for _ in 0..count {
                    let op = match cursor.u8()? {
                        OP_PUT => BatchOp::Put {
                            key: cursor.bytes()?.to_vec(),
                            value: cursor.bytes()?.to_vec(),
                        },
                        OP_DELETE => BatchOp::Delete {
                            key: cursor.bytes()?.to_vec(),
                        },
                        OP_ADD_INDEX => BatchOp::AddIndex {
                            target: cursor.bytes()?.to_vec(),
                            source: cursor.string()?,
                        },
                        OP_REMOVE_INDEX => BatchOp::RemoveIndex {
                            target: cursor.bytes()?.to_vec(),
                            source: cursor.string()?,
                        },
                        other => {
                            return Err(StorageError::Corrupted(format!(
                                "unknown batch op {other}"
                            )))
                        }
                    };
                    batch.push(op);
                }
                Self::Batch { snapshot, batch }
            }
        };
        if !cursor.is_empty() {
            return Err(StorageError::Corrupted("trailing bytes in frame".into()));
        }
        Ok(frame)
    }
}

/// Decodes every complete frame in `bytes`.
///
/// Returns the frames and the length of the valid prefix. Bytes past that
/// length belong to a torn write and can be truncated.
pub(crate) fn decode_frames(bytes: &[u8]) -> StorageResult<(Vec<Frame>, usize)> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while bytes.len() - offset >= HEADER_SIZE {
        let header = &bytes[offset..offset + HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Err(StorageError::Corrupted(format!(
                "bad frame magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported log version {version}"
            )));
        }
        let kind = FrameKind::from_byte(header[6]).ok_or_else(|| {
            StorageError::Corrupted(format!("unknown frame kind {}", header[6]))
        })?;
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let end = offset + HEADER_SIZE + len + CRC_SIZE;
        if end > bytes.len() {
            break;
        }

        let body = &bytes[offset..end - CRC_SIZE];
        let stored = u32::from_le_bytes([
            bytes[end - 4],
            bytes[end - 3],
            bytes[end - 2],
            bytes[end - 1],
        ]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch at offset {offset}: expected {stored:#010x}, got {computed:#010x}"
            )));
        }

        frames.push(Frame::decode_payload(kind, &body[HEADER_SIZE..])?);
        offset = end;
    }

    Ok((frames, offset))
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> StorageResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| StorageError::Corrupted(format!("length {len} exceeds frame limit")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) -> StorageResult<()> {
    put_len(buf, data.len())?;
    buf.extend_from_slice(data);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| StorageError::Corrupted("frame payload too short".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> StorageResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn bytes(&mut self) -> StorageResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> StorageResult<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StorageError::Corrupted("frame string is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> Frame {
        let mut batch = WriteBatch::new();
        batch.store(b"key", b"value");
        batch.store(b"gone", b"");
        batch.add_index(b"target", "src");
        batch.remove_index(b"target", "old");
        Frame::Batch { snapshot: 42, batch }
    }

    #[test]
    fn frames_decode_in_sequence() {
        let mut tags = TypeTags {
            type_tag: 3,
            link_tags: BTreeMap::new(),
        };
        tags.link_tags.insert("friends".into(), 1);
        let first = Frame::Type {
            name: "person".into(),
            tags,
        };
        let second = sample_batch();

        let mut bytes = first.encode().unwrap();
        bytes.extend(second.encode().unwrap());

        let (frames, valid) = decode_frames(&bytes).unwrap();
        assert_eq!(valid, bytes.len());
        assert_eq!(frames, vec![first, second]);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let frame = sample_batch().encode().unwrap();
        let mut bytes = frame.clone();
        bytes.extend_from_slice(&frame[..frame.len() - 3]);

        let (frames, valid) = decode_frames(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(valid, frame.len());
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let mut bytes = sample_batch().encode().unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        assert!(matches!(
            decode_frames(&bytes),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn checksum_covers_header() {
        let mut bytes = sample_batch().encode().unwrap();
        let crc_at = bytes.len() - CRC_SIZE;
        let payload_only = crc32fast::hash(&bytes[HEADER_SIZE..crc_at]);
        bytes[crc_at..].copy_from_slice(&payload_only.to_le_bytes());
        assert!(matches!(
            decode_frames(&bytes),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = sample_batch().encode().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode_frames(&bytes),
            Err(StorageError::Corrupted(_))
        ));
    }
}
