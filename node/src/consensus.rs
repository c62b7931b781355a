// Consensus engine (spec.md S4.6): per-height Propose -> Collect -> Commit/
// Abort state machine. Owns exactly one round at a time; a finished round is
// dropped once the height advances (spec.md S3 "Consensus round state").

use log::{info, warn};
use std::collections::HashMap;
use synod_common::{
    block::{Block, Height, NodeId},
    crypto::Hash,
    vote::{Decision, Vote},
};

use crate::error::ConsensusError;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum RoundPhase {
    AwaitingProposal,
    Collecting,
    Committed,
    Aborted,
}

struct RoundState {
    height: Height,
    parent_hash: Hash,
    proposer: NodeId,
    n_validators: usize,
    proposed_block: Option<Block>,
    votes: HashMap<NodeId, Decision>,
    phase: RoundPhase,
}

/// `ceil(2 * n / 3)` (spec.md S3 "Supermajority").
fn supermajority_threshold(n_validators: usize) -> usize {
    (2 * n_validators).div_ceil(3)
}

pub struct ConsensusEngine {
    round: Option<RoundState>,
}

impl ConsensusEngine {
    pub fn new() -> Self {
        ConsensusEngine { round: None }
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.as_ref().map(|r| r.phase).unwrap_or(RoundPhase::Aborted)
    }

    pub fn height(&self) -> Option<Height> {
        self.round.as_ref().map(|r| r.height)
    }

    /// Enters height `height`: proposer rotation is the caller's job (the
    /// supervisor knows the sorted AINode peer set), this just opens a fresh
    /// round (spec.md S4.6).
    pub fn start_height(&mut self, height: Height, parent_hash: Hash, proposer: NodeId, n_validators: usize) {
        self.round = Some(RoundState {
            height,
            parent_hash,
            proposer,
            n_validators,
            proposed_block: None,
            votes: HashMap::new(),
            phase: RoundPhase::AwaitingProposal,
        });
    }

    /// Handles a proposal from `from`. Only the first valid proposal from the
    /// expected proposer is accepted; everything else (including a second
    /// proposal from the same proposer) is silently dropped, not an error
    /// (spec.md S4.6 "Tie-breaks").
    pub fn on_proposal(&mut self, from: NodeId, block: Block) -> Result<(), ConsensusError> {
        let round = self.round.as_mut().ok_or(ConsensusError::WrongHeight)?;
        if round.phase != RoundPhase::AwaitingProposal {
            return Ok(());
        }
        if from != round.proposer {
            return Err(ConsensusError::WrongProposer);
        }
        if block.height != round.height {
            return Err(ConsensusError::WrongHeight);
        }
        if block.parent_hash != round.parent_hash {
            return Err(ConsensusError::WrongParent);
        }
        round.proposed_block = Some(block);
        round.phase = RoundPhase::Collecting;
        Ok(())
    }

    /// Records a vote and checks the supermajority thresholds. Returns the
    /// committed block once the Approve threshold is reached. A vote for a
    /// height other than the current round, a repeat vote from a voter, or a
    /// vote whose block hash does not match the proposed block is dropped,
    /// not an error (spec.md S3 Vote dedup, P5).
    pub fn on_vote(&mut self, vote: Vote) -> Result<Option<Block>, ConsensusError> {
        let round = self.round.as_mut().ok_or(ConsensusError::WrongHeight)?;
        if vote.height != round.height || round.phase != RoundPhase::Collecting {
            return Ok(None);
        }
        let Some(proposed) = &round.proposed_block else {
            return Ok(None);
        };
        if vote.block_hash != synod_common::crypto::Hashable::hash(proposed) {
            return Ok(None);
        }
        if round.votes.contains_key(&vote.voter) {
            return Ok(None);
        }
        round.votes.insert(vote.voter, vote.decision);

        let threshold = supermajority_threshold(round.n_validators);
        let approvals = round.votes.values().filter(|d| **d == Decision::Approve).count();
        let rejections = round.votes.values().filter(|d| **d == Decision::Reject).count();

        if approvals >= threshold {
            round.phase = RoundPhase::Committed;
            info!("height {} committed with {approvals}/{} approvals", round.height, round.n_validators);
            return Ok(round.proposed_block.clone());
        }
        if rejections >= threshold {
            round.phase = RoundPhase::Aborted;
            warn!("height {} aborted: reject supermajority reached", round.height);
        }
        Ok(None)
    }

    /// Called by the round timer; aborts an unresolved round, a no-op if the
    /// round already reached a terminal phase (spec.md S4.6).
    pub fn on_round_timeout(&mut self) -> bool {
        let Some(round) = self.round.as_mut() else {
            return false;
        };
        if round.phase == RoundPhase::AwaitingProposal || round.phase == RoundPhase::Collecting {
            round.phase = RoundPhase::Aborted;
            warn!("height {} round timed out, aborting", round.height);
            true
        } else {
            false
        }
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic proposer rotation over the sorted AINode id set, indexed by
/// height (spec.md S4.6).
pub fn proposer_for(height: Height, sorted_ainode_ids: &[NodeId]) -> Option<NodeId> {
    if sorted_ainode_ids.is_empty() {
        return None;
    }
    Some(sorted_ainode_ids[(height as usize) % sorted_ainode_ids.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_common::{
        amount::Amount,
        crypto::{Address, Hashable, KeyPair},
        transaction::{Transaction, TransactionTag},
    };

    fn block(height: Height, parent: Hash, proposer: NodeId) -> Block {
        Block::new(
            height,
            parent,
            proposer,
            1000 + height,
            vec![Transaction::new_system(TransactionTag::BlockReward, proposer, Amount::from_tokens(1), 1000 + height)],
        )
    }

    #[test]
    fn rotation_wraps_around_sorted_ids() {
        let ids = vec![Address::from_bytes([1u8; 32]), Address::from_bytes([2u8; 32])];
        assert_eq!(proposer_for(0, &ids), Some(ids[0]));
        assert_eq!(proposer_for(1, &ids), Some(ids[1]));
        assert_eq!(proposer_for(2, &ids), Some(ids[0]));
    }

    #[test]
    fn commits_at_exactly_two_thirds_threshold() {
        let mut engine = ConsensusEngine::new();
        let p1 = KeyPair::from_seed([1u8; 32]);
        let v2 = Address::from_bytes([2u8; 32]);
        let v3 = Address::from_bytes([3u8; 32]);
        engine.start_height(1, Hash::zero(), p1.address(), 3);

        let b = block(1, Hash::zero(), p1.address());
        engine.on_proposal(p1.address(), b.clone()).unwrap();
        assert_eq!(engine.phase(), RoundPhase::Collecting);

        let block_hash = b.hash();
        engine
            .on_vote(Vote::new(1, block_hash, p1.address(), Decision::Approve, &p1))
            .unwrap();
        assert_eq!(engine.phase(), RoundPhase::Collecting);

        let committed = engine
            .on_vote(Vote::new(1, block_hash, v2, Decision::Approve, &p1))
            .unwrap();
        assert!(committed.is_some());
        assert_eq!(engine.phase(), RoundPhase::Committed);
        let _ = v3;
    }

    #[test]
    fn one_vote_short_of_threshold_does_not_commit() {
        let mut engine = ConsensusEngine::new();
        let p1 = KeyPair::from_seed([4u8; 32]);
        engine.start_height(1, Hash::zero(), p1.address(), 3);
        let b = block(1, Hash::zero(), p1.address());
        engine.on_proposal(p1.address(), b.clone()).unwrap();
        let committed = engine
            .on_vote(Vote::new(1, b.hash(), p1.address(), Decision::Approve, &p1))
            .unwrap();
        assert!(committed.is_none());
        assert_eq!(engine.phase(), RoundPhase::Collecting);
    }

    #[test]
    fn timeout_aborts_an_unresolved_round() {
        let mut engine = ConsensusEngine::new();
        let p1 = Address::from_bytes([5u8; 32]);
        engine.start_height(1, Hash::zero(), p1, 3);
        assert!(engine.on_round_timeout());
        assert_eq!(engine.phase(), RoundPhase::Aborted);
        assert!(!engine.on_round_timeout());
    }

    #[test]
    fn proposal_from_wrong_proposer_is_rejected() {
        let mut engine = ConsensusEngine::new();
        let expected = Address::from_bytes([6u8; 32]);
        let impostor = KeyPair::from_seed([7u8; 32]);
        engine.start_height(1, Hash::zero(), expected, 3);
        let b = block(1, Hash::zero(), impostor.address());
        assert_eq!(engine.on_proposal(impostor.address(), b), Err(ConsensusError::WrongProposer));
    }

    #[test]
    fn second_proposal_is_dropped_not_an_error() {
        let mut engine = ConsensusEngine::new();
        let p1 = KeyPair::from_seed([8u8; 32]);
        engine.start_height(1, Hash::zero(), p1.address(), 3);
        let first = block(1, Hash::zero(), p1.address());
        engine.on_proposal(p1.address(), first.clone()).unwrap();
        let mut second = block(1, Hash::zero(), p1.address());
        second.timestamp += 1;
        engine.on_proposal(p1.address(), second).unwrap();
        assert_eq!(engine.phase(), RoundPhase::Collecting);
    }
}
