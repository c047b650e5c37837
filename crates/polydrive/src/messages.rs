//! Binary encoding of operations and stored records
//!
//! Unsigned integers use a compact varint: values below 0xfd take one byte,
//! otherwise a marker byte (0xfd, 0xfe, 0xff) is followed by a little-endian
//! u16, u32 or u64. Strings and JSON are a length-prefixed UTF-8 string.

use crate::error::{DriveError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use polyblobs::BlobRef;
use polylog::WriterId;

const FLAG_BLOB: u64 = 1;
const FLAG_LINKNAME: u64 = 2;
const FLAG_METADATA: u64 = 4;

const FLAG_RESOLUTION_FILE: u64 = 1;

pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

pub trait Decode: Sized {
    fn decode(buf: &mut &[u8]) -> Result<Self>;

    /// Decode a complete value, rejecting trailing bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let value = Self::decode(&mut buf)?;
        if buf.has_remaining() {
            return Err(DriveError::decode(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }
        Ok(value)
    }
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(DriveError::decode(format!("truncated {what}")));
    }
    Ok(())
}

pub(crate) fn put_uint(buf: &mut BytesMut, n: u64) {
    if n < 0xfd {
        buf.put_u8(n as u8);
    } else if n <= u64::from(u16::MAX) {
        buf.put_u8(0xfd);
        buf.put_u16_le(n as u16);
    } else if n <= u64::from(u32::MAX) {
        buf.put_u8(0xfe);
        buf.put_u32_le(n as u32);
    } else {
        buf.put_u8(0xff);
        buf.put_u64_le(n);
    }
}

pub(crate) fn get_uint(buf: &mut &[u8]) -> Result<u64> {
    need(buf, 1, "uint")?;
    match buf.get_u8() {
        0xfd => {
            need(buf, 2, "uint")?;
            Ok(u64::from(buf.get_u16_le()))
        }
        0xfe => {
            need(buf, 4, "uint")?;
            Ok(u64::from(buf.get_u32_le()))
        }
        0xff => {
            need(buf, 8, "uint")?;
            Ok(buf.get_u64_le())
        }
        n => Ok(u64::from(n)),
    }
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

fn put_bool(buf: &mut BytesMut, b: bool) {
    buf.put_u8(u8::from(b));
}

fn get_bool(buf: &mut &[u8]) -> Result<bool> {
    Ok(get_u8(buf)? != 0)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    put_uint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    let len = usize::try_from(get_uint(buf)?)
        .map_err(|_| DriveError::decode("string length overflow"))?;
    need(buf, len, "string")?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| DriveError::decode(e.to_string()))
}

fn put_json(buf: &mut BytesMut, value: &serde_json::Value) {
    put_string(buf, &value.to_string());
}

fn get_json(buf: &mut &[u8]) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&get_string(buf)?)?)
}

fn put_writer(buf: &mut BytesMut, writer: &WriterId) {
    buf.put_slice(writer.as_bytes());
}

fn get_writer(buf: &mut &[u8]) -> Result<WriterId> {
    need(buf, WriterId::LEN, "writer key")?;
    let key = WriterId::from_slice(&buf[..WriterId::LEN])?;
    buf.advance(WriterId::LEN);
    Ok(key)
}

impl Encode for BlobRef {
    fn encode(&self, buf: &mut BytesMut) {
        put_uint(buf, self.block_offset);
        put_uint(buf, self.block_length);
        put_uint(buf, self.byte_offset);
        put_uint(buf, self.byte_length);
    }
}

impl Decode for BlobRef {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(BlobRef {
            block_offset: get_uint(buf)?,
            block_length: get_uint(buf)?,
            byte_offset: get_uint(buf)?,
            byte_length: get_uint(buf)?,
        })
    }
}

/// Content description of a file, without its author
#[derive(Debug, Clone, Default, PartialEq)]
pub struct File {
    pub blob: Option<BlobRef>,
    pub executable: bool,
    /// Symlink target. A file with a linkname has no blob.
    pub linkname: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl File {
    pub fn blob(blob: BlobRef) -> Self {
        Self {
            blob: Some(blob),
            ..Self::default()
        }
    }

    pub fn symlink(linkname: impl Into<String>) -> Self {
        Self {
            linkname: Some(linkname.into()),
            ..Self::default()
        }
    }
}

impl Encode for File {
    fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.blob.is_some() {
            flags |= FLAG_BLOB;
        }
        if self.linkname.is_some() {
            flags |= FLAG_LINKNAME;
        }
        if self.metadata.is_some() {
            flags |= FLAG_METADATA;
        }
        put_uint(buf, flags);
        if let Some(blob) = &self.blob {
            blob.encode(buf);
        }
        put_bool(buf, self.executable);
        if let Some(linkname) = &self.linkname {
            put_string(buf, linkname);
        }
        if let Some(metadata) = &self.metadata {
            put_json(buf, metadata);
        }
    }
}

impl Decode for File {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = get_uint(buf)?;
        let blob = if flags & FLAG_BLOB != 0 {
            Some(BlobRef::decode(buf)?)
        } else {
            None
        };
        let executable = get_bool(buf)?;
        let linkname = if flags & FLAG_LINKNAME != 0 {
            Some(get_string(buf)?)
        } else {
            None
        };
        let metadata = if flags & FLAG_METADATA != 0 {
            Some(get_json(buf)?)
        } else {
            None
        };
        Ok(File {
            blob,
            executable,
            linkname,
            metadata,
        })
    }
}

/// A file together with the writer that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub source: WriterId,
    pub file: File,
}

impl Entry {
    pub fn new(source: WriterId, file: File) -> Self {
        Self { source, file }
    }

    pub fn blob(&self) -> Option<&BlobRef> {
        self.file.blob.as_ref()
    }

    pub fn linkname(&self) -> Option<&str> {
        self.file.linkname.as_deref()
    }
}

impl Encode for Entry {
    fn encode(&self, buf: &mut BytesMut) {
        put_writer(buf, &self.source);
        self.file.encode(buf);
    }
}

impl Decode for Entry {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let source = get_writer(buf)?;
        Ok(Entry {
            source,
            file: File::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    File = 0,
    Tombstone = 1,
}

/// History record of one path: who wrote it and whether it was a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub kind: VersionType,
    pub source: WriterId,
}

impl Version {
    pub fn file(source: WriterId) -> Self {
        Self {
            kind: VersionType::File,
            source,
        }
    }

    pub fn tombstone(source: WriterId) -> Self {
        Self {
            kind: VersionType::Tombstone,
            source,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == VersionType::Tombstone
    }
}

impl Encode for Version {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind as u8);
        put_writer(buf, &self.source);
    }
}

impl Decode for Version {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let kind = match get_u8(buf)? {
            0 => VersionType::File,
            1 => VersionType::Tombstone,
            other => {
                return Err(DriveError::decode(format!("unknown version type {other}")));
            }
        };
        Ok(Version {
            kind,
            source: get_writer(buf)?,
        })
    }
}

/// One entry of the shared operation log
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Writer {
        key: WriterId,
        removed: bool,
        indexer: bool,
    },
    Addition {
        path: String,
        file: File,
    },
    Deletion {
        path: String,
    },
    Resolution {
        path: String,
        file: Option<File>,
    },
}

impl Operation {
    pub fn kind(&self) -> u8 {
        match self {
            Operation::Writer { .. } => 0,
            Operation::Addition { .. } => 1,
            Operation::Deletion { .. } => 2,
            Operation::Resolution { .. } => 3,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Operation::Writer { .. } => None,
            Operation::Addition { path, .. }
            | Operation::Deletion { path }
            | Operation::Resolution { path, .. } => Some(path),
        }
    }
}

impl Encode for Operation {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind());
        match self {
            Operation::Writer {
                key,
                removed,
                indexer,
            } => {
                put_writer(buf, key);
                put_bool(buf, *removed);
                put_bool(buf, *indexer);
            }
            Operation::Addition { path, file } => {
                put_string(buf, path);
                file.encode(buf);
            }
            Operation::Deletion { path } => put_string(buf, path),
            Operation::Resolution { path, file } => {
                put_uint(buf, if file.is_some() { FLAG_RESOLUTION_FILE } else { 0 });
                put_string(buf, path);
                if let Some(file) = file {
                    file.encode(buf);
                }
            }
        }
    }
}

impl Decode for Operation {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let op = match get_u8(buf)? {
            0 => Operation::Writer {
                key: get_writer(buf)?,
                removed: get_bool(buf)?,
                indexer: get_bool(buf)?,
            },
            1 => Operation::Addition {
                path: get_string(buf)?,
                file: File::decode(buf)?,
            },
            2 => Operation::Deletion {
                path: get_string(buf)?,
            },
            3 => {
                let flags = get_uint(buf)?;
                let path = get_string(buf)?;
                let file = if flags & FLAG_RESOLUTION_FILE != 0 {
                    Some(File::decode(buf)?)
                } else {
                    None
                };
                Operation::Resolution { path, file }
            }
            other => return Err(DriveError::decode(format!("unknown operation type {other}"))),
        };
        Ok(op)
    }
}

/// Ask a peer to reopen the content core of `writer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupRequest {
    pub writer: WriterId,
}

impl Encode for WakeupRequest {
    fn encode(&self, buf: &mut BytesMut) {
        put_writer(buf, &self.writer);
    }
}

impl Decode for WakeupRequest {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(WakeupRequest {
            writer: get_writer(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupResult {
    pub success: bool,
}

impl Encode for WakeupResult {
    fn encode(&self, buf: &mut BytesMut) {
        put_bool(buf, self.success);
    }
}

impl Decode for WakeupResult {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(WakeupResult {
            success: get_bool(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_uint_boundaries() {
        for (n, len) in [(0xfc, 1), (0xfd, 3), (0x1_0000, 5), (1 << 40, 9)] {
            let mut buf = BytesMut::new();
            put_uint(&mut buf, n);
            assert_eq!(buf.len(), len, "encoded length of {n}");
            let mut slice = &buf[..];
            assert_eq!(get_uint(&mut slice).unwrap(), n);
        }
    }

    #[test]
    fn test_file_layout() {
        let file = File {
            blob: Some(BlobRef {
                block_offset: 1,
                block_length: 2,
                byte_offset: 3,
                byte_length: 4,
            }),
            executable: true,
            linkname: None,
            metadata: Some(json!({ "mode": 420 })),
        };
        let bytes = file.to_bytes();
        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..6], &[1, 2, 3, 4, 1]);
        assert_eq!(File::from_bytes(&bytes).unwrap(), file);
    }

    #[test]
    fn test_resolution_without_file() {
        let op = Operation::Resolution {
            path: "/a".to_string(),
            file: None,
        };
        let bytes = op.to_bytes();
        assert_eq!(&bytes[..], &[3, 0, 2, b'/', b'a']);
        assert_eq!(Operation::from_bytes(&bytes).unwrap(), op);
    }

    #[test]
    fn test_unknown_kind_is_invalid_operation() {
        let err = Operation::from_bytes(&[9, 0]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidOperation));
        let err = Entry::from_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidOperation));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = WakeupResult { success: true }.to_bytes().to_vec();
        bytes.push(0);
        assert!(WakeupResult::from_bytes(&bytes).is_err());
    }
}
