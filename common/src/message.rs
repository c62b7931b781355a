// P2P wire protocol (spec.md S4.8).
//
// Every message is wrapped in a `SignedMessage` envelope and authenticated
// with the sender's node key before dispatch. `message_id` backs the gossip
// dedup cache (spec.md S4.8 "each message carries a monotone message id").

use crate::{
    amount::Amount,
    block::{Block, Height, NodeId},
    crypto::{Address, PubKey, Signature},
    peer::{PeerDescriptor, Role},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
    transaction::Transaction,
    vote::Vote,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub node_id: NodeId,
    pub public_key: PubKey,
    pub network_id: String,
    pub role: Role,
    /// Whether this node advertises itself as a bootstrap pioneer
    /// (spec.md S4.5 "first incoming peer handshake that advertises
    /// pioneer role").
    pub is_pioneer: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct BootstrapCommitPayload {
    pub liquidity: Address,
    pub burn: Address,
    pub maintenance: Address,
    pub developer: Address,
    pub initial_liquidity_amount: Amount,
    pub proposed_timestamp: TimestampMillis,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum MessagePayload {
    Handshake(HandshakePayload),
    Heartbeat { tip_height: Height },
    TransactionGossip(Transaction),
    BlockProposal(Block),
    Vote(Vote),
    CommittedBlock(Block),
    BootstrapCommit(BootstrapCommitPayload),
    PeerExchange(Vec<PeerDescriptor>),
}

impl MessagePayload {
    fn kind(&self) -> u8 {
        match self {
            MessagePayload::Handshake(_) => 0,
            MessagePayload::Heartbeat { .. } => 1,
            MessagePayload::TransactionGossip(_) => 2,
            MessagePayload::BlockProposal(_) => 3,
            MessagePayload::Vote(_) => 4,
            MessagePayload::CommittedBlock(_) => 5,
            MessagePayload::BootstrapCommit(_) => 6,
            MessagePayload::PeerExchange(_) => 7,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message_id: u64,
    pub sender: NodeId,
    pub payload: MessagePayload,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn new(
        message_id: u64,
        sender: NodeId,
        payload: MessagePayload,
        signer: &crate::crypto::KeyPair,
    ) -> Self {
        let mut unsigned = Self {
            message_id,
            sender,
            payload,
            signature: Signature::from_bytes([0u8; 64]),
        };
        let bytes = unsigned.signing_bytes();
        unsigned.signature = signer.sign(&bytes);
        unsigned
    }

    fn signing_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u64(self.message_id);
        self.sender.write(&mut writer);
        write_payload(&self.payload, &mut writer);
        writer.bytes()
    }

    pub fn verify(&self, sender_key: &PubKey) -> bool {
        sender_key.verify(&self.signing_bytes(), &self.signature)
    }
}

fn write_payload(payload: &MessagePayload, writer: &mut Writer) {
    writer.write_u8(payload.kind());
    match payload {
        MessagePayload::Handshake(h) => {
            h.node_id.write(writer);
            h.public_key.write(writer);
            writer.write_bytes_vec(h.network_id.as_bytes());
            h.role.write(writer);
            writer.write_bool(h.is_pioneer);
        }
        MessagePayload::Heartbeat { tip_height } => writer.write_u64(*tip_height),
        MessagePayload::TransactionGossip(tx) => tx.write(writer),
        MessagePayload::BlockProposal(block) => block.write(writer),
        MessagePayload::Vote(vote) => vote.write(writer),
        MessagePayload::CommittedBlock(block) => block.write(writer),
        MessagePayload::BootstrapCommit(commit) => {
            commit.liquidity.write(writer);
            commit.burn.write(writer);
            commit.maintenance.write(writer);
            commit.developer.write(writer);
            commit.initial_liquidity_amount.write(writer);
            writer.write_u64(commit.proposed_timestamp);
        }
        MessagePayload::PeerExchange(peers) => writer.write_vec(peers, |w, p| p.write(w)),
    }
}

fn read_payload(reader: &mut Reader) -> Result<MessagePayload, ReaderError> {
    Ok(match reader.read_u8()? {
        0 => MessagePayload::Handshake(HandshakePayload {
            node_id: NodeId::read(reader)?,
            public_key: PubKey::read(reader)?,
            network_id: String::from_utf8(reader.read_bytes_vec()?)
                .map_err(|_| ReaderError::InvalidValue)?,
            role: Role::read(reader)?,
            is_pioneer: reader.read_bool()?,
        }),
        1 => MessagePayload::Heartbeat {
            tip_height: reader.read_u64()?,
        },
        2 => MessagePayload::TransactionGossip(Transaction::read(reader)?),
        3 => MessagePayload::BlockProposal(Block::read(reader)?),
        4 => MessagePayload::Vote(Vote::read(reader)?),
        5 => MessagePayload::CommittedBlock(Block::read(reader)?),
        6 => MessagePayload::BootstrapCommit(BootstrapCommitPayload {
            liquidity: Address::read(reader)?,
            burn: Address::read(reader)?,
            maintenance: Address::read(reader)?,
            developer: Address::read(reader)?,
            initial_liquidity_amount: Amount::read(reader)?,
            proposed_timestamp: reader.read_u64()?,
        }),
        7 => MessagePayload::PeerExchange(reader.read_vec(PeerDescriptor::read)?),
        _ => return Err(ReaderError::InvalidValue),
    })
}

impl Serializer for SignedMessage {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.message_id);
        self.sender.write(writer);
        write_payload(&self.payload, writer);
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let message_id = reader.read_u64()?;
        let sender = NodeId::read(reader)?;
        let payload = read_payload(reader)?;
        let signature = Signature::read(reader)?;
        Ok(SignedMessage {
            message_id,
            sender,
            payload,
            signature,
        })
    }
}
