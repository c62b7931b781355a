// PubKey / Signature / Address primitives.
//
// The spec treats the signature scheme and address format as opaque (spec.md
// S1, S6). Ed25519 is the concrete choice made here; nothing above this
// module depends on the scheme beyond `verify`/`sign`.

use crate::{
    crypto::hash::{hash, Hash},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter},
    str::FromStr,
};

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct PubKey([u8; PUBLIC_KEY_SIZE]);

impl PubKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PubKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Address derived deterministically from the public key. The spec
    /// leaves address format opaque (spec.md S3); this node uses the hash of
    /// the public key directly, no separate registration step.
    pub fn derive_address(&self) -> Address {
        Address(hash(&self.0))
    }

    fn verifying_key(&self) -> Result<VerifyingKey, ed25519_dalek::SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = self.verifying_key() else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

impl Display for PubKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.to_hex())
    }
}

impl Serializer for PubKey {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(PubKey(reader.read_bytes_32()?))
    }

    fn size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl Serializer for Signature {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(&reader_take(reader, SIGNATURE_SIZE)?);
        Ok(Signature(bytes))
    }

    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

// `Reader` only exposes fixed-size helpers for common widths; 64 bytes is
// read as two 32-byte chunks to avoid adding a one-off accessor.
fn reader_take(reader: &mut Reader, len: usize) -> Result<Vec<u8>, ReaderError> {
    debug_assert_eq!(len, SIGNATURE_SIZE);
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&reader.read_bytes_32()?);
    out.extend_from_slice(&reader.read_bytes_32()?);
    Ok(out)
}

/// Opaque per-node signing identity. Not serialized; kept only in memory by
/// the component that owns it (consensus engine for self-votes, block
/// producer for proposer signatures, P2P layer for handshakes).
pub struct KeyPair {
    signing_key: SigningKey,
    public_key: PubKey,
}

impl KeyPair {
    pub fn generate<R: rand_core::CryptoRngCore>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let public_key = PubKey(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = PubKey(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> PubKey {
        self.public_key
    }

    pub fn address(&self) -> Address {
        self.public_key.derive_address()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

pub const ADDRESS_SIZE: usize = 32;

/// Opaque account identifier (spec.md S3 `Address`). Derived from a public
/// key; the spec does not require addresses to be reversible to a key, only
/// stable and comparable, so a plain hash-of-pubkey is sufficient.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Address(Hash);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(Hash::new(bytes))
    }

    /// Deterministic system addresses (liquidity, burn, maintenance,
    /// developer) are derived from a fixed label rather than a real key pair,
    /// matching the genesis bootstrap contract in spec.md S4.5.
    pub fn system(label: &str) -> Self {
        Address(hash(format!("synod/system/{label}").as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Address(Hash::from_str(s)?))
    }
}

impl Serializer for Address {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Address(Hash::read(reader)?))
    }

    fn size(&self) -> usize {
        ADDRESS_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_and_verify() {
        let keys = KeyPair::generate(&mut OsRng);
        let msg = b"commit block 1";
        let sig = keys.sign(msg);
        assert!(keys.public_key().verify(msg, &sig));
        assert!(!keys.public_key().verify(b"other message", &sig));
    }

    #[test]
    fn address_is_deterministic() {
        let keys = KeyPair::from_seed([7u8; 32]);
        let a1 = keys.address();
        let a2 = keys.public_key().derive_address();
        assert_eq!(a1, a2);
    }

    #[test]
    fn system_addresses_are_stable_and_distinct() {
        let liquidity = Address::system("liquidity");
        let liquidity2 = Address::system("liquidity");
        let burn = Address::system("burn");
        assert_eq!(liquidity, liquidity2);
        assert_ne!(liquidity, burn);
    }
}
