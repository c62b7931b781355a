// Halving / Fee-Split engine (spec.md S4.3).
//
// `reward_for`/`split_for` are pure functions of the persisted
// `halvings_elapsed` counter; `observe_committed` is the only mutator and is
// called by the ledger store once a block has committed.

use log::info;
use synod_common::amount::Amount;

/// Percentage-point triple (burn, maintenance, liquidity) summing to 100,
/// kept as exact integers so H1 never drifts under repeated halvings
/// (spec.md S8 P7).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct SplitPercent {
    pub burn: u64,
    pub maintenance: u64,
    pub liquidity: u64,
}

impl SplitPercent {
    pub fn new(burn: u64, maintenance: u64, liquidity: u64) -> Self {
        debug_assert_eq!(burn + maintenance + liquidity, 100);
        SplitPercent {
            burn,
            maintenance,
            liquidity,
        }
    }

    /// Splits `fee` into (burn, maintenance, liquidity) amounts that sum
    /// back to `fee` exactly (spec.md S8 P6).
    pub fn apply(&self, fee: Amount) -> (Amount, Amount, Amount) {
        fee.split_three(self.burn, self.maintenance, self.liquidity, 100)
    }

    /// One halving step: burn decreases by `min(decrement, burn)`, the
    /// actual decrement is split in half between maintenance and liquidity
    /// (remainder, if any, to maintenance). Once burn is zero the split is
    /// a fixed point (spec.md S4.3 H2).
    fn step(self, decrement: u64) -> Self {
        let actual = decrement.min(self.burn);
        let half_a = actual / 2;
        let half_b = actual - half_a;
        SplitPercent {
            burn: self.burn - actual,
            maintenance: self.maintenance + half_a,
            liquidity: self.liquidity + half_b,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HalvingEngine {
    initial_reward: Amount,
    initial_split: SplitPercent,
    decrement_per_halving: u64,
    halving_period_blocks: u64,
    halvings_elapsed: u64,
    // cached result of `recompute`, refreshed on every mutation.
    reward: Amount,
    split: SplitPercent,
}

impl HalvingEngine {
    pub fn new(
        initial_reward: Amount,
        initial_split: SplitPercent,
        decrement_per_halving: u64,
        halving_period_blocks: u64,
    ) -> Self {
        let mut engine = HalvingEngine {
            initial_reward,
            initial_split,
            decrement_per_halving,
            halving_period_blocks,
            halvings_elapsed: 0,
            reward: initial_reward,
            split: initial_split,
        };
        engine.recompute();
        engine
    }

    /// Reconstruct from persisted state (node restart).
    pub fn from_persisted(
        initial_reward: Amount,
        initial_split: SplitPercent,
        decrement_per_halving: u64,
        halving_period_blocks: u64,
        halvings_elapsed: u64,
    ) -> Self {
        let mut engine = HalvingEngine {
            initial_reward,
            initial_split,
            decrement_per_halving,
            halving_period_blocks,
            halvings_elapsed,
            reward: initial_reward,
            split: initial_split,
        };
        engine.recompute();
        engine
    }

    fn recompute(&mut self) {
        let (reward, split) = Self::pure_reward_and_split(
            self.initial_reward,
            self.initial_split,
            self.decrement_per_halving,
            self.halvings_elapsed,
        );
        self.reward = reward;
        self.split = split;
    }

    /// Pure function of the halvings-elapsed counter (spec.md S4.3).
    pub fn pure_reward_and_split(
        initial_reward: Amount,
        initial_split: SplitPercent,
        decrement_per_halving: u64,
        halvings_elapsed: u64,
    ) -> (Amount, SplitPercent) {
        let reward = Amount::from_raw(initial_reward.raw() >> halvings_elapsed.min(127));
        let mut split = initial_split;
        for _ in 0..halvings_elapsed {
            split = split.step(decrement_per_halving);
        }
        (reward, split)
    }

    pub fn reward_for(&self, _height: u64) -> Amount {
        self.reward
    }

    pub fn split_for(&self, _height: u64) -> SplitPercent {
        self.split
    }

    pub fn halvings_elapsed(&self) -> u64 {
        self.halvings_elapsed
    }

    /// Called once a block at `height` has committed; triggers the
    /// transition for every subsequent block when `height` is a positive
    /// multiple of the halving period (spec.md S8 scenario 3: the block at
    /// the boundary itself still uses the pre-transition values).
    pub fn observe_committed(&mut self, height: u64) {
        if height > 0 && height % self.halving_period_blocks == 0 {
            self.halvings_elapsed += 1;
            self.recompute();
            info!(
                "halving #{} triggered at height {height}: reward={}, split=({}, {}, {})",
                self.halvings_elapsed, self.reward, self.split.burn, self.split.maintenance, self.split.liquidity
            );
        }
    }
}
