use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter},
    str::FromStr,
};

pub const HASH_SIZE: usize = 32;

/// Opaque 32-byte digest. The spec treats the hash function itself as a
/// primitive (spec.md S1 "Out of scope"); blake3 is the concrete choice
/// carried over from the teacher codebase.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Debug, Serialize, Deserialize)]
pub struct HashValue([u8; HASH_SIZE]);

pub type Hash = HashValue;

impl HashValue {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        HashValue(bytes)
    }

    pub const fn zero() -> Self {
        HashValue([0u8; HASH_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for HashValue {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "invalid hex string")?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| "invalid hash length")?;
        Ok(HashValue::new(bytes))
    }
}

impl Display for HashValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.to_hex())
    }
}

impl Serializer for HashValue {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(HashValue::new(reader.read_bytes_32()?))
    }

    fn size(&self) -> usize {
        HASH_SIZE
    }
}

/// Hash the canonical encoding of a value using blake3.
#[inline]
pub fn hash(bytes: &[u8]) -> HashValue {
    HashValue::new(blake3::hash(bytes).into())
}

pub trait Hashable {
    fn hash(&self) -> HashValue;
}
