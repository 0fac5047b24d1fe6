//! Record handles and the typed record codec.

use std::fmt;

use crate::storage::superblock::RecordKind;
use crate::types::{DecodeError, Fixed};

/// Opaque reference to a record slot. `Handle::NULL` refers to nothing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "#null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A fixed-size record kept in a [`RecordStore`](crate::storage::RecordStore).
pub trait Record: Sized {
    /// Which kind of store file holds this record.
    const KIND: RecordKind;

    /// Encoded size in bytes.
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Result<Self, RecordError>;
}

/// A key record. Each key slot of a node owns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord<K>(pub K);

impl<K: Fixed> Record for KeyRecord<K> {
    const KIND: RecordKind = RecordKind::Key;
    const SIZE: usize = K::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.0.encode(buf);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        Ok(Self(K::decode(buf)?))
    }
}

/// Read a little-endian u64 field from a record buffer.
pub(crate) fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Write a little-endian u64 field into a record buffer.
pub(crate) fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Errors produced while decoding a record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A key or value field failed to decode.
    Field(DecodeError),
    /// The record is structurally impossible.
    Malformed(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(e) => write!(f, "field decode error: {e}"),
            Self::Malformed(msg) => write!(f, "malformed record: {msg}"),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Field(e) => Some(e),
            Self::Malformed(_) => None,
        }
    }
}

impl From<DecodeError> for RecordError {
    fn from(e: DecodeError) -> Self {
        Self::Field(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(Handle::NULL.is_null());
        assert!(!Handle::new(3).is_null());
        assert_eq!(Handle::default(), Handle::NULL);
        assert_eq!(format!("{:?}", Handle::NULL), "#null");
        assert_eq!(Handle::new(12).to_string(), "#12");
    }

    #[test]
    fn test_key_record_uses_key_encoding() {
        let mut buf = vec![0u8; KeyRecord::<u32>::SIZE];
        KeyRecord(7_u32).encode(&mut buf);
        assert_eq!(KeyRecord::<u32>::decode(&buf), Ok(KeyRecord(7)));
    }
}
