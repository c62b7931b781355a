// Shared peer-facing types used both on the wire (Handshake/PeerExchange
// payloads) and by the node's internal peer set (spec.md S3 "Peer entry",
// S4.8).

use crate::{
    block::NodeId,
    crypto::PubKey,
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum Role {
    AINode,
    Observer,
}

impl Role {
    fn to_u8(self) -> u8 {
        match self {
            Role::AINode => 0,
            Role::Observer => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self, ReaderError> {
        match v {
            0 => Ok(Role::AINode),
            1 => Ok(Role::Observer),
            _ => Err(ReaderError::InvalidValue),
        }
    }
}

impl Serializer for Role {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.to_u8());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Role::from_u8(reader.read_u8()?)
    }
}

/// A peer as described over the wire: handshake self-description, or an
/// entry handed around during peer exchange / returned by the peer directory
/// (spec.md S6).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub node_id: NodeId,
    pub transport_address: String,
    pub public_key: PubKey,
    pub network_id: String,
    pub role: Role,
}

impl Serializer for PeerDescriptor {
    fn write(&self, writer: &mut Writer) {
        self.node_id.write(writer);
        writer.write_bytes_vec(self.transport_address.as_bytes());
        self.public_key.write(writer);
        writer.write_bytes_vec(self.network_id.as_bytes());
        self.role.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let node_id = NodeId::read(reader)?;
        let transport_address = String::from_utf8(reader.read_bytes_vec()?)
            .map_err(|_| ReaderError::InvalidValue)?;
        let public_key = PubKey::read(reader)?;
        let network_id =
            String::from_utf8(reader.read_bytes_vec()?).map_err(|_| ReaderError::InvalidValue)?;
        let role = Role::read(reader)?;
        Ok(PeerDescriptor {
            node_id,
            transport_address,
            public_key,
            network_id,
            role,
        })
    }
}
