// Ledger store (spec.md S4.1).
//
// The only component that mutates balances, nonces, halving state and
// reputation state; every other component reads it through the accessor
// methods below, which return copies (spec.md S3 "Ownership").

use crate::{
    error::LedgerError,
    halving::{HalvingEngine, SplitPercent},
    reputation::ReputationEngine,
    storage::{LedgerSnapshot, Storage},
};
use log::{error, info};
use std::collections::HashMap;
use synod_common::{
    amount::Amount,
    block::{Block, Height},
    config::{SYSTEM_TX_COUNT_GENESIS, SYSTEM_TX_COUNT_REGULAR},
    crypto::{Address, Hash, Hashable},
    time::TimestampMillis,
    transaction::{Transaction, TransactionTag},
};

#[derive(Clone, Copy, Debug)]
pub struct SystemAddresses {
    pub liquidity: Address,
    pub burn: Address,
    pub maintenance: Address,
    pub developer: Address,
}

struct Tip {
    height: Height,
    hash: Hash,
    timestamp: TimestampMillis,
}

pub struct LedgerStore {
    storage: Storage,
    tip: Option<Tip>,
    blocks: Vec<Block>,
    block_index_by_hash: HashMap<Hash, usize>,
    balances: HashMap<Address, Amount>,
    last_nonce: HashMap<Address, u64>,
    halving: HalvingEngine,
    reputation: ReputationEngine,
    system_addresses: SystemAddresses,
}

impl LedgerStore {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        storage: Storage,
        system_addresses: SystemAddresses,
        initial_reward: Amount,
        initial_split: SplitPercent,
        decrement_per_halving: u64,
        halving_period_blocks: u64,
        reputation_decay_bps_per_day: u32,
    ) -> Result<Self, LedgerError> {
        let snapshot = storage.read_snapshot()?;

        let (tip, balances, halvings_elapsed, reputation_entries) = match snapshot {
            Some(s) => (
                Some(Tip {
                    height: s.tip_height,
                    hash: s.tip_hash,
                    timestamp: s.tip_timestamp,
                }),
                s.balances.into_iter().map(|(a, raw)| (a, Amount::from_raw(raw))).collect(),
                s.halvings_elapsed,
                s.reputation,
            ),
            None => (None, HashMap::new(), 0, Vec::new()),
        };

        let halving = HalvingEngine::from_persisted(
            initial_reward,
            initial_split,
            decrement_per_halving,
            halving_period_blocks,
            halvings_elapsed,
        );
        let reputation = ReputationEngine::from_persisted(reputation_decay_bps_per_day, reputation_entries);

        let from_height = tip.as_ref().map(|t| t.height).unwrap_or(0);
        let recovered_from_log = if tip.is_some() {
            storage.blocks_after(from_height)?
        } else {
            storage.read_all_blocks()?
        };

        let mut store = LedgerStore {
            storage,
            tip,
            blocks: Vec::new(),
            block_index_by_hash: HashMap::new(),
            balances,
            last_nonce: HashMap::new(),
            halving,
            reputation,
            system_addresses,
        };

        for block in recovered_from_log {
            store.index_block(block);
        }

        Ok(store)
    }

    fn index_block(&mut self, block: Block) {
        let index = self.blocks.len();
        self.block_index_by_hash.insert(block.hash(), index);
        for tx in &block.transactions {
            self.last_nonce.insert(tx.sender, tx.nonce);
        }
        self.blocks.push(block);
    }

    pub fn tip(&self) -> (Height, Hash) {
        match &self.tip {
            Some(t) => (t.height, t.hash),
            None => (0, Hash::zero()),
        }
    }

    pub fn has_genesis(&self) -> bool {
        self.tip.is_some()
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or(Amount::ZERO)
    }

    pub fn block_at(&self, height: Height) -> Option<&Block> {
        self.blocks.get(height as usize)
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<&Block> {
        self.block_index_by_hash.get(hash).and_then(|i| self.blocks.get(*i))
    }

    pub fn halvings_elapsed(&self) -> u64 {
        self.halving.halvings_elapsed()
    }

    pub fn current_reward(&self) -> Amount {
        self.halving.reward_for(self.tip().0)
    }

    pub fn current_split(&self) -> SplitPercent {
        self.halving.split_for(self.tip().0)
    }

    pub fn reputation_multiplier(&self, address: &Address, now: TimestampMillis) -> f64 {
        self.reputation.priority_multiplier(address, now)
    }

    pub fn last_nonce_of(&self, address: &Address) -> Option<u64> {
        self.last_nonce.get(address).copied()
    }

    pub fn system_addresses(&self) -> SystemAddresses {
        self.system_addresses
    }

    /// Appends a block that consensus has already committed (spec.md S4.1).
    /// Idempotent: a repeat call with the exact same already-committed block
    /// is a no-op returning the same height (spec.md S8 "Idempotent commit").
    pub fn append_committed_block(&mut self, block: Block) -> Result<Height, LedgerError> {
        let block_hash = block.hash();
        if let Some(tip) = &self.tip {
            if tip.height == block.height && tip.hash == block_hash {
                return Ok(tip.height);
            }
        }

        self.validate_b1_b3(&block)?;
        let total_fees = self.validate_system_transactions(&block)?;
        self.validate_and_collect_effects(&block, total_fees)?;

        if let Err(e) = self.storage.append_block(&block) {
            error!("durable block append failed at height {}: {e}", block.height);
            return Err(LedgerError::Storage(e));
        }

        self.apply_effects(&block);
        self.halving.observe_committed(block.height);

        self.tip = Some(Tip {
            height: block.height,
            hash: block_hash,
            timestamp: block.timestamp,
        });

        if let Err(e) = self.write_snapshot() {
            error!("durable snapshot write failed at height {}: {e}", block.height);
            return Err(LedgerError::Storage(e));
        }

        self.index_block(block);
        info!("committed block at height {}", self.tip().0);
        Ok(self.tip().0)
    }

    fn write_snapshot(&self) -> Result<(), crate::error::StorageError> {
        let (tip_height, tip_hash) = self.tip();
        let tip_timestamp = self.tip.as_ref().map(|t| t.timestamp).unwrap_or(0);
        let snapshot = LedgerSnapshot {
            tip_height,
            tip_hash,
            tip_timestamp,
            balances: self.balances.iter().map(|(a, amt)| (*a, amt.raw())).collect(),
            halvings_elapsed: self.halving.halvings_elapsed(),
            reputation: self.reputation.persisted_entries(),
        };
        self.storage.write_snapshot(&snapshot)
    }

    // B1 (parent hash) and B3 (strictly increasing timestamp).
    fn validate_b1_b3(&self, block: &Block) -> Result<(), LedgerError> {
        match &self.tip {
            None => {
                if block.height != 0 || !block.parent_hash.is_zero() {
                    return Err(LedgerError::WrongParent);
                }
            }
            Some(tip) => {
                if block.height != tip.height + 1 || block.parent_hash != tip.hash {
                    return Err(LedgerError::WrongParent);
                }
                if block.timestamp <= tip.timestamp {
                    return Err(LedgerError::NonMonotonicTimestamp);
                }
            }
        }
        Ok(())
    }

    // B2: leading system transactions match the fixed shape for this height.
    // Returns the total declared fee of the non-system transactions.
    fn validate_system_transactions(&self, block: &Block) -> Result<Amount, LedgerError> {
        if block.height == 0 {
            let txs = &block.transactions;
            if txs.len() < SYSTEM_TX_COUNT_GENESIS {
                return Err(LedgerError::BadSystemTransactions);
            }
            let expected = [
                (TransactionTag::SystemInit, self.system_addresses.liquidity),
                (TransactionTag::SystemInit, self.system_addresses.burn),
                (TransactionTag::SystemInit, self.system_addresses.maintenance),
                (TransactionTag::SystemInit, self.system_addresses.developer),
            ];
            for (tx, (tag, addr)) in txs.iter().zip(expected.iter()) {
                if tx.tag != *tag || tx.recipient != *addr {
                    return Err(LedgerError::BadSystemTransactions);
                }
            }
            return Ok(Amount::ZERO);
        }

        let txs = &block.transactions;
        if txs.len() < SYSTEM_TX_COUNT_REGULAR {
            return Err(LedgerError::BadSystemTransactions);
        }
        let reward_tx = &txs[0];
        let fee_burn_tx = &txs[1];
        let fee_maint_tx = &txs[2];
        let fee_liq_tx = &txs[3];

        if reward_tx.tag != TransactionTag::BlockReward
            || fee_burn_tx.tag != TransactionTag::FeeBurn
            || fee_maint_tx.tag != TransactionTag::FeeMaintenance
            || fee_liq_tx.tag != TransactionTag::FeeLiquidity
        {
            return Err(LedgerError::BadSystemTransactions);
        }
        if fee_burn_tx.recipient != self.system_addresses.burn
            || fee_maint_tx.recipient != self.system_addresses.maintenance
            || fee_liq_tx.recipient != self.system_addresses.liquidity
        {
            return Err(LedgerError::BadSystemTransactions);
        }
        if reward_tx.recipient != block.proposer {
            return Err(LedgerError::BadSystemTransactions);
        }
        if reward_tx.amount != self.halving.reward_for(block.height) {
            return Err(LedgerError::BadSystemTransactions);
        }

        let user_txs = &txs[SYSTEM_TX_COUNT_REGULAR..];
        let total_fees = user_txs
            .iter()
            .try_fold(Amount::ZERO, |acc, tx| acc.checked_add(tx.fee))
            .ok_or(LedgerError::BadSystemTransactions)?;

        let split = self.halving.split_for(block.height);
        let (expected_burn, expected_maint, expected_liq) = split.apply(total_fees);
        if fee_burn_tx.amount != expected_burn
            || fee_maint_tx.amount != expected_maint
            || fee_liq_tx.amount != expected_liq
        {
            return Err(LedgerError::BadSystemTransactions);
        }

        Ok(total_fees)
    }

    // Dry-run every non-system transaction's balance/nonce effect without
    // mutating state, so a failing block leaves the store untouched.
    fn validate_and_collect_effects(&self, block: &Block, _total_fees: Amount) -> Result<(), LedgerError> {
        let mut scratch_balances: HashMap<Address, Amount> = HashMap::new();
        let mut scratch_nonces: HashMap<Address, u64> = HashMap::new();

        let user_txs_start = if block.height == 0 {
            SYSTEM_TX_COUNT_GENESIS
        } else {
            SYSTEM_TX_COUNT_REGULAR
        };

        for tx in &block.transactions[user_txs_start..] {
            if tx.tag.is_system() {
                return Err(LedgerError::BadSystemTransactions);
            }
            if tx.tag == TransactionTag::VoluntaryBurn && self.halving.split_for(block.height).burn > 0 {
                return Err(LedgerError::BadSystemTransactions);
            }
            if tx.tag == TransactionTag::VoluntaryBurn && tx.recipient != self.system_addresses.burn {
                return Err(LedgerError::BadSystemTransactions);
            }

            let last_nonce = scratch_nonces
                .get(&tx.sender)
                .copied()
                .or_else(|| self.last_nonce.get(&tx.sender).copied());
            if let Some(last) = last_nonce {
                if tx.nonce <= last {
                    return Err(LedgerError::BadSystemTransactions);
                }
            }
            scratch_nonces.insert(tx.sender, tx.nonce);

            let current = scratch_balances
                .get(&tx.sender)
                .copied()
                .unwrap_or_else(|| self.balance_of(&tx.sender));
            let debited = current
                .checked_sub(tx.fee)
                .and_then(|b| b.checked_sub(tx.amount))
                .ok_or(LedgerError::DoubleSpend { address: tx.sender })?;
            scratch_balances.insert(tx.sender, debited);
        }

        for tx in &block.transactions[..user_txs_start] {
            let current = scratch_balances
                .get(&tx.recipient)
                .copied()
                .unwrap_or_else(|| self.balance_of(&tx.recipient));
            scratch_balances.insert(tx.recipient, current + tx.amount);
        }
        for tx in &block.transactions[user_txs_start..] {
            let recipient_current = scratch_balances
                .get(&tx.recipient)
                .copied()
                .unwrap_or_else(|| self.balance_of(&tx.recipient));
            scratch_balances.insert(tx.recipient, recipient_current + tx.amount);
        }

        Ok(())
    }

    fn apply_effects(&mut self, block: &Block) {
        let user_txs_start = if block.height == 0 {
            SYSTEM_TX_COUNT_GENESIS
        } else {
            SYSTEM_TX_COUNT_REGULAR
        };

        for tx in &block.transactions[..user_txs_start] {
            self.credit(tx.recipient, tx.amount);
        }

        for tx in &block.transactions[user_txs_start..] {
            self.debit(tx.sender, tx.fee + tx.amount);
            self.credit(tx.recipient, tx.amount);
            self.last_nonce.insert(tx.sender, tx.nonce);

            if tx.tag == TransactionTag::VoluntaryBurn {
                self.reputation
                    .record_burn(tx.sender, tx.amount.floor_tokens(), block.timestamp);
            }
        }
    }

    fn credit(&mut self, address: Address, amount: Amount) {
        let entry = self.balances.entry(address).or_insert(Amount::ZERO);
        *entry = entry.checked_add(amount).expect("credited balance overflow");
    }

    fn debit(&mut self, address: Address, amount: Amount) {
        let entry = self.balances.entry(address).or_insert(Amount::ZERO);
        *entry = entry.checked_sub(amount).expect("debit already validated as non-negative");
    }
}
