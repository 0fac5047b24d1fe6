//! Fixed-width binary encoding for keys and values.
//!
//! Every key and value stored in the tree has a fixed encoded size so that
//! records pack into equal slots. Integers are encoded big-endian with the
//! sign bit flipped so that the byte order matches the numeric order, which
//! keeps dumps of the key file readable in sorted order.

/// A type with a fixed-size binary encoding.
pub trait Fixed: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the encoding into `buf`, which is exactly `SIZE` bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Read a value back from exactly `SIZE` bytes.
    fn decode(buf: &[u8]) -> Result<Self, DecodeError>;
}

macro_rules! impl_fixed_unsigned {
    ($($ty:ty),*) => {
        $(
            impl Fixed for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_be_bytes());
                }

                fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
                    let bytes = buf.try_into().map_err(|_| DecodeError::WrongLength {
                        expected: Self::SIZE,
                        actual: buf.len(),
                    })?;
                    Ok(Self::from_be_bytes(bytes))
                }
            }
        )*
    };
}

macro_rules! impl_fixed_signed {
    ($($ty:ty => $unsigned:ty),*) => {
        $(
            impl Fixed for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[allow(clippy::cast_sign_loss)]
                fn encode(&self, buf: &mut [u8]) {
                    let flipped = (*self as $unsigned) ^ (1 << (<$unsigned>::BITS - 1));
                    buf.copy_from_slice(&flipped.to_be_bytes());
                }

                #[allow(clippy::cast_possible_wrap)]
                fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
                    let bytes = buf.try_into().map_err(|_| DecodeError::WrongLength {
                        expected: Self::SIZE,
                        actual: buf.len(),
                    })?;
                    let flipped = <$unsigned>::from_be_bytes(bytes);
                    Ok((flipped ^ (1 << (<$unsigned>::BITS - 1))) as $ty)
                }
            }
        )*
    };
}

impl_fixed_unsigned!(u8, u16, u32, u64, u128);
impl_fixed_signed!(i8 => u8, i16 => u16, i32 => u32, i64 => u64, i128 => u128);

impl<const N: usize> Fixed for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        buf.try_into().map_err(|_| DecodeError::WrongLength {
            expected: N,
            actual: buf.len(),
        })
    }
}

/// Errors produced while decoding a fixed-width value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input slice does not have the encoded size.
    WrongLength { expected: usize, actual: usize },
    /// A stored length prefix exceeds the capacity.
    LengthOutOfRange { len: usize, capacity: usize },
    /// String bytes are not valid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "expected {expected} encoded bytes, got {actual}")
            }
            Self::LengthOutOfRange { len, capacity } => {
                write!(f, "stored length {len} exceeds capacity {capacity}")
            }
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<T: Fixed>(value: &T) -> Vec<u8> {
        let mut buf = vec![0u8; T::SIZE];
        value.encode(&mut buf);
        buf
    }

    #[test]
    fn test_unsigned_roundtrip() {
        let buf = encoded(&0xDEAD_BEEF_u32);
        assert_eq!(u32::decode(&buf), Ok(0xDEAD_BEEF));
    }

    #[test]
    fn test_signed_encoding_preserves_order() {
        let values = [i64::MIN, -42, -1, 0, 1, 42, i64::MAX];
        let encodings: Vec<Vec<u8>> = values.iter().map(encoded).collect();

        assert!(encodings.windows(2).all(|pair| pair[0] < pair[1]));
        for (value, bytes) in values.iter().zip(&encodings) {
            assert_eq!(i64::decode(bytes), Ok(*value));
        }
    }

    #[test]
    fn test_byte_array_roundtrip() {
        let key = *b"abcd";
        assert_eq!(<[u8; 4]>::decode(&encoded(&key)), Ok(key));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            u64::decode(&[1, 2, 3]),
            Err(DecodeError::WrongLength {
                expected: 8,
                actual: 3
            })
        );
    }
}
