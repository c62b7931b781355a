// Block wire/ledger type (spec.md S3).

use crate::{
    crypto::{hash, Address, Hash, Hashable, PubKey, Signature},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
    transaction::Transaction,
};
use serde::{Deserialize, Serialize};

pub type Height = u64;

/// Node identity doubles as the address that receives the block reward
/// (spec.md S8 scenario 1: "BlockReward(+1024 to P1)").
pub type NodeId = Address;

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Block {
    pub height: Height,
    pub parent_hash: Hash,
    pub proposer: NodeId,
    pub timestamp: TimestampMillis,
    pub transactions: Vec<Transaction>,
    pub merkle_root: Hash,
    pub proposer_signature: Option<Signature>,
}

impl Block {
    pub fn new(
        height: Height,
        parent_hash: Hash,
        proposer: NodeId,
        timestamp: TimestampMillis,
        transactions: Vec<Transaction>,
    ) -> Self {
        let merkle_root = merkle_root(&transactions);
        Self {
            height,
            parent_hash,
            proposer,
            timestamp,
            transactions,
            merkle_root,
            proposer_signature: None,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    /// Bytes signed by the proposer - the header fields excluding the
    /// signature itself and the raw transaction list (the merkle root
    /// already commits to the transactions, spec.md S3 "Identity = hash of
    /// header").
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write_header(&mut writer);
        writer.bytes()
    }

    fn write_header(&self, writer: &mut Writer) {
        writer.write_u64(self.height);
        self.parent_hash.write(writer);
        self.proposer.write(writer);
        writer.write_u64(self.timestamp);
        self.merkle_root.write(writer);
    }

    pub fn sign(&mut self, signer: &crate::crypto::KeyPair) {
        let bytes = self.header_bytes();
        self.proposer_signature = Some(signer.sign(&bytes));
    }

    pub fn verify_proposer_signature(&self, proposer_key: &PubKey) -> bool {
        match &self.proposer_signature {
            Some(sig) => proposer_key.verify(&self.header_bytes(), sig),
            None => false,
        }
    }

    /// Recomputes the merkle root from `transactions` and compares it to the
    /// stored field - callers use this to detect tampering between the
    /// declared root and the actual transaction list.
    pub fn merkle_root_matches(&self) -> bool {
        merkle_root(&self.transactions) == self.merkle_root
    }
}

/// Binary merkle tree over transaction ids. An empty block hashes to the
/// zero hash (genesis has no user transactions preceding its SystemInit
/// entries in some configurations, but in practice every block has at least
/// the leading system transactions).
pub fn merkle_root(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return Hash::zero();
    }

    let mut layer: Vec<Hash> = transactions.iter().map(|tx| tx.id()).collect();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let combined = if pair.len() == 2 {
                let mut bytes = Vec::with_capacity(64);
                bytes.extend_from_slice(pair[0].as_bytes());
                bytes.extend_from_slice(pair[1].as_bytes());
                hash(&bytes)
            } else {
                pair[0]
            };
            next.push(combined);
        }
        layer = next;
    }
    layer[0]
}

impl Hashable for Block {
    fn hash(&self) -> Hash {
        hash(&self.header_bytes())
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        self.write_header(writer);
        writer.write_vec(&self.transactions, |w, tx| tx.write(w));
        match &self.proposer_signature {
            Some(sig) => {
                writer.write_bool(true);
                sig.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let height = reader.read_u64()?;
        let parent_hash = Hash::read(reader)?;
        let proposer = NodeId::read(reader)?;
        let timestamp = reader.read_u64()?;
        let merkle_root = Hash::read(reader)?;
        let transactions = reader.read_vec(Transaction::read)?;
        let proposer_signature = if reader.read_bool()? {
            Some(Signature::read(reader)?)
        } else {
            None
        };

        Ok(Block {
            height,
            parent_hash,
            proposer,
            timestamp,
            transactions,
            merkle_root,
            proposer_signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{amount::Amount, crypto::KeyPair, transaction::TransactionTag};

    fn sample_tx(nonce: u64) -> Transaction {
        Transaction::new_system(
            TransactionTag::BlockReward,
            Address::from_bytes([1u8; 32]),
            Amount::from_tokens(nonce),
            1000,
        )
    }

    #[test]
    fn roundtrip_with_transactions() {
        let keys = KeyPair::from_seed([9u8; 32]);
        let mut block = Block::new(
            1,
            Hash::zero(),
            keys.address(),
            1000,
            vec![sample_tx(1), sample_tx(2)],
        );
        block.sign(&keys);

        let bytes = block.to_bytes();
        let decoded = Block::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.verify_proposer_signature(&keys.public_key()));
        assert!(decoded.merkle_root_matches());
    }

    #[test]
    fn tampering_with_a_transaction_breaks_merkle_root() {
        let keys = KeyPair::from_seed([9u8; 32]);
        let mut block = Block::new(1, Hash::zero(), keys.address(), 1000, vec![sample_tx(1)]);
        block.transactions[0].amount = Amount::from_tokens(999);
        assert!(!block.merkle_root_matches());
    }

    #[test]
    fn genesis_has_zero_parent() {
        let keys = KeyPair::from_seed([2u8; 32]);
        let block = Block::new(0, Hash::zero(), keys.address(), 0, vec![]);
        assert!(block.is_genesis());
        assert!(block.parent_hash.is_zero());
    }
}
