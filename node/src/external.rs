// Pluggable external collaborators (spec.md S6): the network-coordinator
// directory service and the AI-model challenge solver. This crate fixes only
// the interface; concrete implementations (an HTTP client against the real
// coordinator, a stub for tests) live outside it and are injected into the
// supervisor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use synod_common::{block::NodeId, crypto::PubKey, peer::Role, time::TimestampMillis};

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct RosterEntry {
    pub node_id: NodeId,
    pub transport_address: String,
    pub network_id: String,
    pub role: Role,
    pub last_seen: TimestampMillis,
    pub approximate_distance: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub transport_address: String,
    pub public_key: PubKey,
    pub network_id: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("coordinator roster signature does not verify")]
    BadRosterSignature,
    #[error("coordinator rejected registration: {0}")]
    RegistrationRejected(String),
    #[error("coordinator request failed: {0}")]
    Transport(String),
}

/// Queried by the P2P layer whenever its peer set drops below the
/// low-water mark (spec.md S4.8, S6 "Peer directory").
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn get_roster(&self, local_location: &str) -> Result<Vec<RosterEntry>, DirectoryError>;
    async fn register(&self, descriptor: NodeDescriptor) -> Result<(), DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeSolverError {
    #[error("challenge solver failed: {0}")]
    Failed(String),
}

/// An AI-model executor. Not consulted on the committed-block path specified
/// here; kept as an interface so a validator can weight "fast AI" in its own
/// vote policy without changing the consensus protocol (spec.md S6).
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, challenge: &[u8]) -> Result<(Vec<u8>, std::time::Duration), ChallengeSolverError>;
}

/// A directory that never has peers to offer and a solver that always fails,
/// used when a node is run standalone (tests, single-pioneer local
/// networks) with neither collaborator wired up.
pub struct NullPeerDirectory;

#[async_trait]
impl PeerDirectory for NullPeerDirectory {
    async fn get_roster(&self, _local_location: &str) -> Result<Vec<RosterEntry>, DirectoryError> {
        Ok(Vec::new())
    }

    async fn register(&self, _descriptor: NodeDescriptor) -> Result<(), DirectoryError> {
        Ok(())
    }
}

pub struct NullChallengeSolver;

#[async_trait]
impl ChallengeSolver for NullChallengeSolver {
    async fn solve(&self, _challenge: &[u8]) -> Result<(Vec<u8>, std::time::Duration), ChallengeSolverError> {
        Err(ChallengeSolverError::Failed("no challenge solver configured".into()))
    }
}
