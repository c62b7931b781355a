// Block producer (spec.md S4.7): on tick, if this node is proposer for the
// next height, drains the pool and assembles a signed proposal.

use crate::{halving::SplitPercent, ledger::SystemAddresses, pool::TransactionPool};
use synod_common::{
    amount::Amount,
    block::{Block, Height, NodeId},
    crypto::{Hash, KeyPair},
    time::TimestampMillis,
    transaction::{Transaction, TransactionTag},
};

pub struct BlockProducer {
    block_period_ms: u64,
}

impl BlockProducer {
    pub fn new(block_period_ms: u64) -> Self {
        BlockProducer { block_period_ms }
    }

    /// Ticks are measured from the tip's committed timestamp, not wall clock,
    /// so a slow round never causes a catch-up burst (spec.md S5).
    pub fn tick_due(&self, tip_timestamp: TimestampMillis, now: TimestampMillis) -> bool {
        now >= tip_timestamp.saturating_add(self.block_period_ms)
    }

    /// Assembles and signs a proposal for height `tip_height + 1` (spec.md
    /// S4.7). The system transactions always lead, in the fixed order
    /// BlockReward, FeeBurn, FeeMaintenance, FeeLiquidity.
    #[allow(clippy::too_many_arguments)]
    pub fn build_proposal(
        &self,
        pool: &mut TransactionPool,
        max_txs: usize,
        tip_height: Height,
        tip_hash: Hash,
        tip_timestamp: TimestampMillis,
        now: TimestampMillis,
        proposer: NodeId,
        reward: Amount,
        split: SplitPercent,
        system_addresses: SystemAddresses,
        keys: &KeyPair,
    ) -> Block {
        let user_txs = pool.drain(max_txs);
        let total_fees = user_txs
            .iter()
            .fold(Amount::ZERO, |acc, tx| acc.checked_add(tx.fee).expect("pool fee sum overflow"));
        let (burn_amt, maint_amt, liq_amt) = split.apply(total_fees);

        let timestamp = now.max(tip_timestamp.saturating_add(1));
        let mut transactions = vec![
            Transaction::new_system(TransactionTag::BlockReward, proposer, reward, timestamp),
            Transaction::new_system(TransactionTag::FeeBurn, system_addresses.burn, burn_amt, timestamp),
            Transaction::new_system(TransactionTag::FeeMaintenance, system_addresses.maintenance, maint_amt, timestamp),
            Transaction::new_system(TransactionTag::FeeLiquidity, system_addresses.liquidity, liq_amt, timestamp),
        ];
        transactions.extend(user_txs);

        let mut block = Block::new(tip_height + 1, tip_hash, proposer, timestamp, transactions);
        block.sign(keys);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_addresses() -> SystemAddresses {
        SystemAddresses {
            liquidity: synod_common::crypto::Address::system("liquidity"),
            burn: synod_common::crypto::Address::system("burn"),
            maintenance: synod_common::crypto::Address::system("maintenance"),
            developer: synod_common::crypto::Address::system("developer"),
        }
    }

    #[test]
    fn tick_due_is_measured_from_tip_timestamp() {
        let producer = BlockProducer::new(10_000);
        assert!(!producer.tick_due(1_000, 10_999));
        assert!(producer.tick_due(1_000, 11_000));
    }

    #[test]
    fn proposal_leads_with_system_transactions_in_fixed_order() {
        let producer = BlockProducer::new(10_000);
        let keys = KeyPair::from_seed([1u8; 32]);
        let mut pool = TransactionPool::new(10, 10);
        let block = producer.build_proposal(
            &mut pool,
            10,
            0,
            Hash::zero(),
            1000,
            12000,
            keys.address(),
            Amount::from_tokens(1024),
            SplitPercent::new(60, 30, 10),
            system_addresses(),
            &keys,
        );
        assert_eq!(block.transactions[0].tag, TransactionTag::BlockReward);
        assert_eq!(block.transactions[0].amount, Amount::from_tokens(1024));
        assert_eq!(block.transactions[1].tag, TransactionTag::FeeBurn);
        assert_eq!(block.transactions[2].tag, TransactionTag::FeeMaintenance);
        assert_eq!(block.transactions[3].tag, TransactionTag::FeeLiquidity);
        assert!(block.verify_proposer_signature(&keys.public_key()));
    }

    #[test]
    fn timestamp_is_at_least_one_millisecond_after_tip() {
        let producer = BlockProducer::new(10_000);
        let keys = KeyPair::from_seed([2u8; 32]);
        let mut pool = TransactionPool::new(10, 10);
        let block = producer.build_proposal(
            &mut pool,
            10,
            5,
            Hash::zero(),
            5_000,
            5_000, // now == tip timestamp: a stalled clock must not repeat it
            keys.address(),
            Amount::from_tokens(1),
            SplitPercent::new(60, 30, 10),
            system_addresses(),
            &keys,
        );
        assert_eq!(block.timestamp, 5_001);
    }
}
