// Transaction pool (spec.md S4.2).
//
// Addresses are one-way hashes of a public key (see crypto::Address), so
// signature checks here need the sender's public key supplied alongside the
// transaction - the wallet/API surface that accepts submissions already
// knows it. This is the one place submit() takes more than the bare
// Transaction.

use crate::error::PoolRejection;
use std::cmp::Ordering;
use std::collections::HashSet;
use synod_common::{
    amount::Amount,
    block::Block,
    crypto::{Hash, PubKey},
    transaction::{Transaction, TransactionTag},
};

struct PoolEntry {
    transaction: Transaction,
    /// Reputation-weighted priority snapshotted at submission time
    /// (spec.md S4.2 ordering key, S4.4 priority multiplier).
    priority: f64,
    arrival_seq: u64,
}

pub struct TransactionPool {
    capacity: usize,
    max_txs_per_block: usize,
    entries: Vec<PoolEntry>,
    next_arrival_seq: u64,
}

impl TransactionPool {
    pub fn new(capacity: usize, max_txs_per_block: usize) -> Self {
        TransactionPool {
            capacity,
            max_txs_per_block,
            entries: Vec::new(),
            next_arrival_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accepts or rejects `tx` (spec.md S4.2). `sender_balance` and
    /// `last_committed_nonce` are the ledger's current view of the sender;
    /// `priority` is the sender's current reputation-weighted priority
    /// (spec.md S4.4), snapshotted once at submission.
    pub fn submit(
        &mut self,
        tx: Transaction,
        sender_public_key: PubKey,
        sender_balance: Amount,
        last_committed_nonce: Option<u64>,
        burn_schedule_active: bool,
        priority: f64,
    ) -> Result<(), PoolRejection> {
        if self.entries.len() >= self.capacity {
            return Err(PoolRejection::PoolFull);
        }
        if tx.tag == TransactionTag::VoluntaryBurn && burn_schedule_active {
            return Err(PoolRejection::BurnScheduleActive);
        }
        if tx.sender != sender_public_key.derive_address() {
            return Err(PoolRejection::UnknownSender);
        }
        if !tx.verify_signature(&sender_public_key) {
            return Err(PoolRejection::BadSignature);
        }
        if let Some(last) = last_committed_nonce {
            if tx.nonce <= last {
                return Err(PoolRejection::DuplicateNonce);
            }
        }
        if self
            .entries
            .iter()
            .any(|e| e.transaction.sender == tx.sender && e.transaction.nonce == tx.nonce)
        {
            return Err(PoolRejection::DuplicateNonce);
        }

        let required = tx.amount.checked_add(tx.fee).ok_or(PoolRejection::InsufficientBalance)?;
        if sender_balance < required {
            return Err(PoolRejection::InsufficientBalance);
        }

        let arrival_seq = self.next_arrival_seq;
        self.next_arrival_seq += 1;
        self.entries.push(PoolEntry {
            transaction: tx,
            priority,
            arrival_seq,
        });
        Ok(())
    }

    /// Removes and returns up to `max_count` transactions (also capped by
    /// `max_txs_per_block`), ordered highest priority first: reputation tier,
    /// then declared fee, then earliest arrival, then transaction id
    /// (spec.md S4.2).
    pub fn drain(&mut self, max_count: usize) -> Vec<Transaction> {
        self.entries.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.transaction.fee.cmp(&a.transaction.fee))
                .then_with(|| a.arrival_seq.cmp(&b.arrival_seq))
                .then_with(|| a.transaction.id().cmp(&b.transaction.id()))
        });
        let count = max_count.min(self.max_txs_per_block).min(self.entries.len());
        self.entries.drain(..count).map(|e| e.transaction).collect()
    }

    /// Drops any pool entry whose id appears in `block` (spec.md S4.2).
    pub fn evict_committed(&mut self, block: &Block) {
        let committed_ids: HashSet<Hash> = block.transactions.iter().map(|t| t.id()).collect();
        self.entries.retain(|e| !committed_ids.contains(&e.transaction.id()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_common::crypto::KeyPair;

    fn signed_tx(keys: &KeyPair, nonce: u64, amount: u64, fee: u64) -> Transaction {
        let mut tx = Transaction::new_user(
            keys.address(),
            synod_common::crypto::Address::from_bytes([9u8; 32]),
            Amount::from_tokens(amount),
            Amount::from_tokens(fee),
            nonce,
            1000 + nonce,
            Vec::new(),
            TransactionTag::Transfer,
        )
        .unwrap();
        tx.sign(keys);
        tx
    }

    #[test]
    fn accepts_valid_transaction() {
        let mut pool = TransactionPool::new(10, 10);
        let keys = KeyPair::from_seed([1u8; 32]);
        let tx = signed_tx(&keys, 1, 100, 10);
        pool.submit(tx, keys.public_key(), Amount::from_tokens(1000), None, false, 1.0)
            .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn exact_balance_boundary_is_accepted_one_unit_over_is_rejected() {
        let keys = KeyPair::from_seed([2u8; 32]);
        let balance = Amount::from_tokens(110);

        let mut pool_ok = TransactionPool::new(10, 10);
        let tx_ok = signed_tx(&keys, 1, 100, 10);
        assert!(pool_ok
            .submit(tx_ok, keys.public_key(), balance, None, false, 1.0)
            .is_ok());

        let mut pool_over = TransactionPool::new(10, 10);
        let mut tx_over = Transaction::new_user(
            keys.address(),
            synod_common::crypto::Address::from_bytes([9u8; 32]),
            Amount::from_raw(Amount::from_tokens(100).raw() + 1),
            Amount::from_tokens(10),
            1,
            1000,
            Vec::new(),
            TransactionTag::Transfer,
        )
        .unwrap();
        tx_over.sign(&keys);
        assert_eq!(
            pool_over.submit(tx_over, keys.public_key(), balance, None, false, 1.0),
            Err(PoolRejection::InsufficientBalance)
        );
    }

    #[test]
    fn duplicate_nonce_is_rejected() {
        let mut pool = TransactionPool::new(10, 10);
        let keys = KeyPair::from_seed([3u8; 32]);
        pool.submit(signed_tx(&keys, 1, 10, 1), keys.public_key(), Amount::from_tokens(1000), None, false, 1.0)
            .unwrap();
        assert_eq!(
            pool.submit(signed_tx(&keys, 1, 20, 1), keys.public_key(), Amount::from_tokens(1000), None, false, 1.0),
            Err(PoolRejection::DuplicateNonce)
        );
    }

    #[test]
    fn nonce_not_above_last_committed_is_rejected() {
        let mut pool = TransactionPool::new(10, 10);
        let keys = KeyPair::from_seed([4u8; 32]);
        assert_eq!(
            pool.submit(signed_tx(&keys, 5, 10, 1), keys.public_key(), Amount::from_tokens(1000), Some(5), false, 1.0),
            Err(PoolRejection::DuplicateNonce)
        );
    }

    #[test]
    fn burn_while_schedule_active_is_rejected() {
        let mut pool = TransactionPool::new(10, 10);
        let keys = KeyPair::from_seed([5u8; 32]);
        let mut tx = Transaction::new_user(
            keys.address(),
            synod_common::crypto::Address::system("burn"),
            Amount::from_tokens(1),
            Amount::ZERO,
            1,
            1000,
            Vec::new(),
            TransactionTag::VoluntaryBurn,
        )
        .unwrap();
        tx.sign(&keys);
        assert_eq!(
            pool.submit(tx, keys.public_key(), Amount::from_tokens(1000), None, true, 1.0),
            Err(PoolRejection::BurnScheduleActive)
        );
    }

    #[test]
    fn pool_full_is_rejected() {
        let mut pool = TransactionPool::new(1, 10);
        let keys = KeyPair::from_seed([6u8; 32]);
        pool.submit(signed_tx(&keys, 1, 10, 1), keys.public_key(), Amount::from_tokens(1000), None, false, 1.0)
            .unwrap();
        let keys2 = KeyPair::from_seed([7u8; 32]);
        assert_eq!(
            pool.submit(signed_tx(&keys2, 1, 10, 1), keys2.public_key(), Amount::from_tokens(1000), None, false, 1.0),
            Err(PoolRejection::PoolFull)
        );
    }

    #[test]
    fn drain_orders_by_priority_then_fee_then_arrival() {
        let mut pool = TransactionPool::new(10, 10);
        let low = KeyPair::from_seed([10u8; 32]);
        let high = KeyPair::from_seed([11u8; 32]);
        pool.submit(signed_tx(&low, 1, 10, 1), low.public_key(), Amount::from_tokens(1000), None, false, 1.0)
            .unwrap();
        pool.submit(signed_tx(&high, 1, 10, 1), high.public_key(), Amount::from_tokens(1000), None, false, 5.0)
            .unwrap();
        let drained = pool.drain(10);
        assert_eq!(drained[0].sender, high.address());
        assert_eq!(drained[1].sender, low.address());
    }

    #[test]
    fn evict_committed_removes_only_matching_ids() {
        let mut pool = TransactionPool::new(10, 10);
        let keys = KeyPair::from_seed([12u8; 32]);
        let tx1 = signed_tx(&keys, 1, 10, 1);
        let tx2 = signed_tx(&keys, 2, 20, 1);
        let id1 = tx1.id();
        pool.submit(tx1.clone(), keys.public_key(), Amount::from_tokens(1000), None, false, 1.0)
            .unwrap();
        pool.submit(tx2, keys.public_key(), Amount::from_tokens(1000), Some(1), false, 1.0)
            .unwrap();
        let block = Block::new(1, Hash::zero(), keys.address(), 1000, vec![tx1]);
        pool.evict_committed(&block);
        assert_eq!(pool.len(), 1);
        assert_ne!(pool.drain(10)[0].id(), id1);
    }
}
