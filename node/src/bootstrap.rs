// Bootstrap manager (spec.md S4.5): produces the genesis block exactly once,
// gated on exactly `pioneer_count` pioneer peers agreeing.

use log::{info, warn};
use std::collections::{HashMap, HashSet};
use synod_common::{
    amount::Amount,
    block::{Block, NodeId},
    crypto::{Address, Hash},
    message::BootstrapCommitPayload,
    time::TimestampMillis,
    transaction::{Transaction, TransactionTag},
};

use crate::error::BootstrapError;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BootstrapPhase {
    Idle,
    CollectingPioneers,
    Ready,
    Genesis,
    Done,
}

pub struct BootstrapManager {
    pioneer_count: usize,
    phase: BootstrapPhase,
    connected_pioneers: HashSet<NodeId>,
    commits: HashMap<NodeId, BootstrapCommitPayload>,
}

impl BootstrapManager {
    pub fn new(pioneer_count: usize) -> Self {
        BootstrapManager {
            pioneer_count,
            phase: BootstrapPhase::Idle,
            connected_pioneers: HashSet::new(),
            commits: HashMap::new(),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// A node restarting after a completed bootstrap starts straight in
    /// `Done`, since the ledger already carries the genesis block.
    pub fn resume_done(&mut self) {
        self.phase = BootstrapPhase::Done;
    }

    pub fn on_pioneer_connected(&mut self, node_id: NodeId) {
        if self.phase == BootstrapPhase::Done {
            return;
        }
        if self.phase == BootstrapPhase::Idle {
            self.phase = BootstrapPhase::CollectingPioneers;
        }
        self.connected_pioneers.insert(node_id);
        self.reevaluate_pioneer_set();
    }

    pub fn on_pioneer_disconnected(&mut self, node_id: &NodeId) {
        if self.phase == BootstrapPhase::Done || self.phase == BootstrapPhase::Genesis {
            return;
        }
        self.connected_pioneers.remove(node_id);
        self.commits.remove(node_id);
        self.reevaluate_pioneer_set();
    }

    fn reevaluate_pioneer_set(&mut self) {
        let size = self.connected_pioneers.len();
        match self.phase {
            BootstrapPhase::CollectingPioneers if size == self.pioneer_count => {
                self.phase = BootstrapPhase::Ready;
                info!("bootstrap: pioneer set complete ({size}/{}) -> Ready", self.pioneer_count);
            }
            BootstrapPhase::Ready if size != self.pioneer_count => {
                self.phase = BootstrapPhase::CollectingPioneers;
                self.commits.clear();
                warn!("bootstrap: pioneer set churned away from Ready, back to CollectingPioneers");
            }
            _ => {}
        }
    }

    /// Records one pioneer's bootstrap-commit vote. Once every connected
    /// pioneer (including self) has committed, either returns the finished
    /// genesis block or aborts back to `CollectingPioneers` on disagreement
    /// (spec.md S4.5).
    pub fn on_bootstrap_commit(
        &mut self,
        from: NodeId,
        payload: BootstrapCommitPayload,
    ) -> Result<Option<Block>, BootstrapError> {
        if self.phase == BootstrapPhase::Done {
            return Err(BootstrapError::AlreadyDone);
        }
        if self.phase != BootstrapPhase::Ready {
            return Ok(None);
        }

        self.commits.insert(from, payload);
        if self.commits.len() < self.pioneer_count {
            return Ok(None);
        }

        let mut values = self.commits.values();
        let first = values.next().expect("at least one commit present");
        let all_agree = values.all(|p| {
            p.liquidity == first.liquidity
                && p.burn == first.burn
                && p.maintenance == first.maintenance
                && p.developer == first.developer
                && p.initial_liquidity_amount == first.initial_liquidity_amount
        });

        if !all_agree {
            warn!("bootstrap: pioneers disagree on system-address set, aborting to CollectingPioneers");
            self.phase = BootstrapPhase::CollectingPioneers;
            self.commits.clear();
            return Err(BootstrapError::CommitDisagreement);
        }

        let timestamp = median_timestamp(self.commits.values().map(|p| p.proposed_timestamp).collect());
        let block = genesis_block(first.liquidity, first.burn, first.maintenance, first.developer, first.initial_liquidity_amount, timestamp);
        self.phase = BootstrapPhase::Genesis;
        Ok(Some(block))
    }

    /// Called once the supervisor has durably appended the genesis block.
    pub fn mark_done(&mut self) {
        self.phase = BootstrapPhase::Done;
        info!("bootstrap: genesis committed, bootstrap is Done");
    }
}

fn median_timestamp(mut values: Vec<TimestampMillis>) -> TimestampMillis {
    values.sort_unstable();
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2
    }
}

fn genesis_block(
    liquidity: Address,
    burn: Address,
    maintenance: Address,
    developer: Address,
    initial_liquidity_amount: Amount,
    timestamp: TimestampMillis,
) -> Block {
    let transactions = vec![
        Transaction::new_system(TransactionTag::SystemInit, liquidity, initial_liquidity_amount, timestamp),
        Transaction::new_system(TransactionTag::SystemInit, burn, Amount::ZERO, timestamp),
        Transaction::new_system(TransactionTag::SystemInit, maintenance, Amount::ZERO, timestamp),
        Transaction::new_system(TransactionTag::SystemInit, developer, Amount::ZERO, timestamp),
    ];
    Block::new(0, Hash::zero(), Address::system("genesis"), timestamp, transactions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(liquidity: Address, burn: Address, maintenance: Address, developer: Address, ts: TimestampMillis) -> BootstrapCommitPayload {
        BootstrapCommitPayload {
            liquidity,
            burn,
            maintenance,
            developer,
            initial_liquidity_amount: Amount::from_tokens(1_048_576),
            proposed_timestamp: ts,
        }
    }

    fn addrs() -> (Address, Address, Address, Address) {
        (
            Address::system("liquidity"),
            Address::system("burn"),
            Address::system("maintenance"),
            Address::system("developer"),
        )
    }

    #[test]
    fn exactly_n_pioneers_reaches_ready() {
        let mut mgr = BootstrapManager::new(2);
        let p1 = Address::from_bytes([1u8; 32]);
        mgr.on_pioneer_connected(p1);
        assert_eq!(mgr.phase(), BootstrapPhase::CollectingPioneers);
        let p2 = Address::from_bytes([2u8; 32]);
        mgr.on_pioneer_connected(p2);
        assert_eq!(mgr.phase(), BootstrapPhase::Ready);
    }

    #[test]
    fn n_minus_one_never_reaches_ready() {
        let mut mgr = BootstrapManager::new(2);
        mgr.on_pioneer_connected(Address::from_bytes([1u8; 32]));
        assert_ne!(mgr.phase(), BootstrapPhase::Ready);
    }

    #[test]
    fn agreement_produces_genesis_block() {
        let mut mgr = BootstrapManager::new(2);
        let p1 = Address::from_bytes([1u8; 32]);
        let p2 = Address::from_bytes([2u8; 32]);
        mgr.on_pioneer_connected(p1);
        mgr.on_pioneer_connected(p2);

        let (liq, burn, maint, dev) = addrs();
        assert!(mgr.on_bootstrap_commit(p1, payload(liq, burn, maint, dev, 1000)).unwrap().is_none());
        let block = mgr.on_bootstrap_commit(p2, payload(liq, burn, maint, dev, 2000)).unwrap().unwrap();
        assert_eq!(block.height, 0);
        assert_eq!(block.timestamp, 1500);
        assert_eq!(block.transactions[0].recipient, liq);
        assert_eq!(block.transactions[0].amount, Amount::from_tokens(1_048_576));
        assert_eq!(mgr.phase(), BootstrapPhase::Genesis);

        mgr.mark_done();
        assert_eq!(mgr.phase(), BootstrapPhase::Done);
        assert_eq!(
            mgr.on_bootstrap_commit(p1, payload(liq, burn, maint, dev, 3000)),
            Err(BootstrapError::AlreadyDone)
        );
    }

    #[test]
    fn disagreement_aborts_to_collecting_pioneers() {
        let mut mgr = BootstrapManager::new(2);
        let p1 = Address::from_bytes([1u8; 32]);
        let p2 = Address::from_bytes([2u8; 32]);
        mgr.on_pioneer_connected(p1);
        mgr.on_pioneer_connected(p2);

        let (liq, burn, maint, dev) = addrs();
        mgr.on_bootstrap_commit(p1, payload(liq, burn, maint, dev, 1000)).unwrap();
        let other_liq = Address::from_bytes([99u8; 32]);
        let result = mgr.on_bootstrap_commit(p2, payload(other_liq, burn, maint, dev, 2000));
        assert_eq!(result, Err(BootstrapError::CommitDisagreement));
        assert_eq!(mgr.phase(), BootstrapPhase::CollectingPioneers);
    }

    #[test]
    fn pioneer_churn_before_ready_returns_to_collecting() {
        let mut mgr = BootstrapManager::new(2);
        let p1 = Address::from_bytes([1u8; 32]);
        let p2 = Address::from_bytes([2u8; 32]);
        mgr.on_pioneer_connected(p1);
        mgr.on_pioneer_connected(p2);
        assert_eq!(mgr.phase(), BootstrapPhase::Ready);
        mgr.on_pioneer_disconnected(&p2);
        assert_eq!(mgr.phase(), BootstrapPhase::CollectingPioneers);
    }
}
