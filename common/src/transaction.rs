// Transaction wire/ledger type (spec.md S3).

use crate::{
    amount::Amount,
    config::MAX_MEMO_SIZE,
    crypto::{hash, Address, Hash, Hashable, PubKey, Signature},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction tag (spec.md S3). System tags are only ever emitted by the
/// block producer (spec.md S4.7) and carry no signature; everything else is
/// a user transaction authenticated by `signature`.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum TransactionTag {
    Transfer,
    FaucetMint,
    BlockReward,
    FeeBurn,
    FeeMaintenance,
    FeeLiquidity,
    VoluntaryBurn,
    SystemInit,
}

impl TransactionTag {
    pub fn is_system(&self) -> bool {
        !matches!(self, TransactionTag::Transfer | TransactionTag::FaucetMint | TransactionTag::VoluntaryBurn)
    }

    fn to_u8(self) -> u8 {
        match self {
            TransactionTag::Transfer => 0,
            TransactionTag::FaucetMint => 1,
            TransactionTag::BlockReward => 2,
            TransactionTag::FeeBurn => 3,
            TransactionTag::FeeMaintenance => 4,
            TransactionTag::FeeLiquidity => 5,
            TransactionTag::VoluntaryBurn => 6,
            TransactionTag::SystemInit => 7,
        }
    }

    fn from_u8(v: u8) -> Result<Self, ReaderError> {
        Ok(match v {
            0 => TransactionTag::Transfer,
            1 => TransactionTag::FaucetMint,
            2 => TransactionTag::BlockReward,
            3 => TransactionTag::FeeBurn,
            4 => TransactionTag::FeeMaintenance,
            5 => TransactionTag::FeeLiquidity,
            6 => TransactionTag::VoluntaryBurn,
            7 => TransactionTag::SystemInit,
            _ => return Err(ReaderError::InvalidValue),
        })
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: u64,
    pub timestamp: TimestampMillis,
    pub memo: Vec<u8>,
    pub tag: TransactionTag,
    /// Omitted (`None`) for system-tagged transactions - spec.md S3.
    pub signature: Option<Signature>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new_user(
        sender: Address,
        recipient: Address,
        amount: Amount,
        fee: Amount,
        nonce: u64,
        timestamp: TimestampMillis,
        memo: Vec<u8>,
        tag: TransactionTag,
    ) -> Result<Self, TransactionBuildError> {
        if tag.is_system() {
            return Err(TransactionBuildError::SystemTagNotAllowed);
        }
        if memo.len() > MAX_MEMO_SIZE {
            return Err(TransactionBuildError::MemoTooLarge);
        }
        Ok(Self {
            sender,
            recipient,
            amount,
            fee,
            nonce,
            timestamp,
            memo,
            tag,
            signature: None,
        })
    }

    /// A block producer's system transaction (spec.md S4.3/S4.5): no nonce
    /// semantics apply, no signature is attached, structural rules alone
    /// validate it (spec.md S3).
    pub fn new_system(
        tag: TransactionTag,
        recipient: Address,
        amount: Amount,
        timestamp: TimestampMillis,
    ) -> Self {
        debug_assert!(tag.is_system());
        Self {
            sender: Address::system("producer"),
            recipient,
            amount,
            fee: Amount::ZERO,
            nonce: 0,
            timestamp,
            memo: Vec::new(),
            tag,
            signature: None,
        }
    }

    /// Bytes signed by the sender: the canonical encoding of every field
    /// except `signature` (spec.md S3).
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write_unsigned(&mut writer);
        writer.bytes()
    }

    fn write_unsigned(&self, writer: &mut Writer) {
        self.sender.write(writer);
        self.recipient.write(writer);
        self.amount.write(writer);
        self.fee.write(writer);
        writer.write_u64(self.nonce);
        writer.write_u64(self.timestamp);
        writer.write_bytes_vec(&self.memo);
        writer.write_u8(self.tag.to_u8());
    }

    pub fn sign(&mut self, signer: &crate::crypto::KeyPair) {
        let bytes = self.signing_bytes();
        self.signature = Some(signer.sign(&bytes));
    }

    /// Verify the signature against a known public key. System transactions
    /// have no signature and are validated structurally instead (spec.md S3,
    /// S6 "Block validation").
    pub fn verify_signature(&self, public_key: &PubKey) -> bool {
        match &self.signature {
            Some(sig) => public_key.verify(&self.signing_bytes(), sig),
            None => false,
        }
    }

    pub fn id(&self) -> Hash {
        hash(&self.to_bytes())
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Hash {
        self.id()
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        self.write_unsigned(writer);
        match &self.signature {
            Some(sig) => {
                writer.write_bool(true);
                sig.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let sender = Address::read(reader)?;
        let recipient = Address::read(reader)?;
        let amount = Amount::read(reader)?;
        let fee = Amount::read(reader)?;
        let nonce = reader.read_u64()?;
        let timestamp = reader.read_u64()?;
        let memo = reader.read_bytes_vec()?;
        if memo.len() > MAX_MEMO_SIZE {
            return Err(ReaderError::InvalidValue);
        }
        let tag = TransactionTag::from_u8(reader.read_u8()?)?;
        let signature = if reader.read_bool()? {
            Some(Signature::read(reader)?)
        } else {
            None
        };

        Ok(Transaction {
            sender,
            recipient,
            amount,
            fee,
            nonce,
            timestamp,
            memo,
            tag,
            signature,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionBuildError {
    #[error("system tags may only be emitted by the block producer")]
    SystemTagNotAllowed,
    #[error("memo exceeds {MAX_MEMO_SIZE} bytes")]
    MemoTooLarge,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction {{ id: {}, tag: {:?}, sender: {}, recipient: {}, amount: {} }}",
            self.id(),
            self.tag,
            self.sender,
            self.recipient,
            self.amount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn signature_roundtrip() {
        let keys = KeyPair::from_seed([1u8; 32]);
        let mut tx = Transaction::new_user(
            keys.address(),
            Address::from_bytes([2u8; 32]),
            Amount::from_tokens(100),
            Amount::from_tokens(1),
            1,
            1000,
            Vec::new(),
            TransactionTag::Transfer,
        )
        .unwrap();
        tx.sign(&keys);
        assert!(tx.verify_signature(&keys.public_key()));

        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.verify_signature(&keys.public_key()));
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let keys = KeyPair::from_seed([3u8; 32]);
        let mut tx = Transaction::new_user(
            keys.address(),
            Address::from_bytes([4u8; 32]),
            Amount::from_tokens(5),
            Amount::ZERO,
            1,
            1000,
            Vec::new(),
            TransactionTag::Transfer,
        )
        .unwrap();
        tx.sign(&keys);
        tx.amount = Amount::from_tokens(500);
        assert!(!tx.verify_signature(&keys.public_key()));
    }

    #[test]
    fn memo_over_limit_is_rejected() {
        let err = Transaction::new_user(
            Address::from_bytes([1u8; 32]),
            Address::from_bytes([2u8; 32]),
            Amount::ZERO,
            Amount::ZERO,
            1,
            1000,
            vec![0u8; MAX_MEMO_SIZE + 1],
            TransactionTag::Transfer,
        )
        .unwrap_err();
        assert!(matches!(err, TransactionBuildError::MemoTooLarge));
    }

    #[test]
    fn system_tag_rejected_from_user_constructor() {
        let err = Transaction::new_user(
            Address::from_bytes([1u8; 32]),
            Address::from_bytes([2u8; 32]),
            Amount::ZERO,
            Amount::ZERO,
            1,
            1000,
            Vec::new(),
            TransactionTag::BlockReward,
        )
        .unwrap_err();
        assert!(matches!(err, TransactionBuildError::SystemTagNotAllowed));
    }
}
