pub mod hash;
pub mod keys;

pub use hash::{hash, Hash, HashValue, Hashable, HASH_SIZE};
pub use keys::{Address, KeyPair, PubKey, Signature, ADDRESS_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
