// Vote wire type (spec.md S3).

use crate::{
    block::{Height, NodeId},
    crypto::{Hash, PubKey, Signature},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub height: Height,
    pub block_hash: Hash,
    pub voter: NodeId,
    pub decision: Decision,
    pub signature: Signature,
}

impl Vote {
    pub fn signing_bytes(height: Height, block_hash: &Hash, voter: &NodeId, decision: Decision) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u64(height);
        block_hash.write(&mut writer);
        voter.write(&mut writer);
        writer.write_u8(match decision {
            Decision::Approve => 0,
            Decision::Reject => 1,
        });
        writer.bytes()
    }

    pub fn new(
        height: Height,
        block_hash: Hash,
        voter: NodeId,
        decision: Decision,
        signer: &crate::crypto::KeyPair,
    ) -> Self {
        let bytes = Self::signing_bytes(height, &block_hash, &voter, decision);
        let signature = signer.sign(&bytes);
        Self {
            height,
            block_hash,
            voter,
            decision,
            signature,
        }
    }

    pub fn verify(&self, voter_key: &PubKey) -> bool {
        let bytes = Self::signing_bytes(self.height, &self.block_hash, &self.voter, self.decision);
        voter_key.verify(&bytes, &self.signature)
    }

    /// Identity used to deduplicate votes: "at most one Vote per (height,
    /// voter)" (spec.md S3).
    pub fn dedup_key(&self) -> (Height, NodeId) {
        (self.height, self.voter)
    }
}

impl Serializer for Vote {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.height);
        self.block_hash.write(writer);
        self.voter.write(writer);
        writer.write_u8(match self.decision {
            Decision::Approve => 0,
            Decision::Reject => 1,
        });
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let height = reader.read_u64()?;
        let block_hash = Hash::read(reader)?;
        let voter = NodeId::read(reader)?;
        let decision = match reader.read_u8()? {
            0 => Decision::Approve,
            1 => Decision::Reject,
            _ => return Err(ReaderError::InvalidValue),
        };
        let signature = Signature::read(reader)?;
        Ok(Vote {
            height,
            block_hash,
            voter,
            decision,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn sign_and_verify() {
        let keys = KeyPair::from_seed([5u8; 32]);
        let vote = Vote::new(1, Hash::zero(), keys.address(), Decision::Approve, &keys);
        assert!(vote.verify(&keys.public_key()));
    }

    #[test]
    fn tampered_decision_fails_verification() {
        let keys = KeyPair::from_seed([6u8; 32]);
        let mut vote = Vote::new(1, Hash::zero(), keys.address(), Decision::Approve, &keys);
        vote.decision = Decision::Reject;
        assert!(!vote.verify(&keys.public_key()));
    }
}
