//! Bounded inline strings usable as fixed-width keys and values.

use std::cmp::Ordering;
use std::fmt;

use crate::types::fixed::{DecodeError, Fixed};

/// A UTF-8 string of at most `N` bytes stored inline.
///
/// Encoded as one length byte followed by `N` bytes, zero padded.
/// Ordering is byte-wise on the string contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineStr<const N: usize> {
    len: u8,
    bytes: [u8; N],
}

impl<const N: usize> InlineStr<N> {
    const CAPACITY_FITS_LENGTH_BYTE: () = assert!(N <= u8::MAX as usize, "capacity above 255");

    /// Build from a string slice, failing if it is longer than `N` bytes.
    pub fn new(s: &str) -> Result<Self, InlineStrTooLong> {
        let () = Self::CAPACITY_FITS_LENGTH_BYTE;
        let src = s.as_bytes();
        let len = u8::try_from(src.len())
            .ok()
            .filter(|_| src.len() <= N)
            .ok_or(InlineStrTooLong {
                len: src.len(),
                capacity: N,
            })?;
        let mut bytes = [0u8; N];
        bytes[..src.len()].copy_from_slice(src);
        Ok(Self { len, bytes })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction only accepts &str and decoding validates UTF-8.
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for InlineStr<N> {
    fn default() -> Self {
        Self {
            len: 0,
            bytes: [0u8; N],
        }
    }
}

impl<const N: usize> Ord for InlineStr<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl<const N: usize> PartialOrd for InlineStr<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const N: usize> TryFrom<&str> for InlineStr<N> {
    type Error = InlineStrTooLong;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl<const N: usize> std::str::FromStr for InlineStr<N> {
    type Err = InlineStrTooLong;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<const N: usize> fmt::Display for InlineStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for InlineStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> Fixed for InlineStr<N> {
    const SIZE: usize = 1 + N;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.len;
        buf[1..].copy_from_slice(&self.bytes);
    }

    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() != Self::SIZE {
            return Err(DecodeError::WrongLength {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let len = buf[0];
        if usize::from(len) > N {
            return Err(DecodeError::LengthOutOfRange {
                len: usize::from(len),
                capacity: N,
            });
        }
        std::str::from_utf8(&buf[1..=usize::from(len)]).map_err(|_| DecodeError::InvalidUtf8)?;
        let mut bytes = [0u8; N];
        bytes[..usize::from(len)].copy_from_slice(&buf[1..=usize::from(len)]);
        Ok(Self { len, bytes })
    }
}

/// The string does not fit the inline capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineStrTooLong {
    pub len: usize,
    pub capacity: usize,
}

impl fmt::Display for InlineStrTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "string of {} bytes exceeds inline capacity {}",
            self.len, self.capacity
        )
    }
}

impl std::error::Error for InlineStrTooLong {}

#[cfg(test)]
mod tests {
    use super::*;

    type Short = InlineStr<8>;

    #[test]
    fn test_orders_by_contents_not_length() {
        let b = Short::new("b").expect("fits");
        let aa = Short::new("aa").expect("fits");
        assert!(aa < b);
    }

    #[test]
    fn test_roundtrip_through_encoding() {
        let s = Short::new("héllo").expect("fits");
        let mut buf = vec![0u8; Short::SIZE];
        s.encode(&mut buf);

        let decoded = Short::decode(&buf).expect("decodes");
        assert_eq!(decoded, s);
        assert_eq!(decoded.as_str(), "héllo");
    }

    #[test]
    fn test_too_long_rejected() {
        assert_eq!(
            Short::new("nine char"),
            Err(InlineStrTooLong {
                len: 9,
                capacity: 8
            })
        );
    }

    #[test]
    fn test_decode_rejects_bad_length_and_utf8() {
        let mut buf = vec![0u8; Short::SIZE];
        buf[0] = 9;
        assert!(matches!(
            Short::decode(&buf),
            Err(DecodeError::LengthOutOfRange { .. })
        ));

        buf[0] = 1;
        buf[1] = 0xFF;
        assert_eq!(Short::decode(&buf), Err(DecodeError::InvalidUtf8));
    }
}
