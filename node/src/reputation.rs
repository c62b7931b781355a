// Voluntary-Burn / Reputation engine (spec.md S4.4).
//
// Decay and the priority multiplier are local heuristics that steer pool
// ordering only - they are not re-verified by voters (spec.md S4.6 validates
// block contents and signatures, not pool order), so floating point is an
// acceptable, non-consensus-critical choice here, unlike `Amount`.

use std::collections::HashMap;
use synod_common::{crypto::Address, time::TimestampMillis};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Clone, Copy, Debug, Default)]
struct ReputationRecord {
    raw_score: u64,
    last_activity_timestamp: TimestampMillis,
}

#[derive(Default)]
pub struct ReputationEngine {
    records: HashMap<Address, ReputationRecord>,
    /// Basis points per day, 0..=10000 (spec.md S6 `reputation_decay_per_day`).
    decay_bps_per_day: u32,
}

impl ReputationEngine {
    pub fn new(decay_bps_per_day: u32) -> Self {
        ReputationEngine {
            records: HashMap::new(),
            decay_bps_per_day,
        }
    }

    /// Reconstruct from persisted per-address records (node restart).
    pub fn from_persisted(decay_bps_per_day: u32, entries: Vec<(Address, u64, TimestampMillis)>) -> Self {
        let mut engine = Self::new(decay_bps_per_day);
        for (address, raw_score, last_activity_timestamp) in entries {
            engine.records.insert(
                address,
                ReputationRecord {
                    raw_score,
                    last_activity_timestamp,
                },
            );
        }
        engine
    }

    pub fn persisted_entries(&self) -> Vec<(Address, u64, TimestampMillis)> {
        self.records
            .iter()
            .map(|(addr, rec)| (*addr, rec.raw_score, rec.last_activity_timestamp))
            .collect()
    }

    /// A committed VoluntaryBurn of `floor(amount)` tokens at `timestamp`
    /// (the committed block's timestamp, not wall clock - spec.md S4.4).
    pub fn record_burn(&mut self, address: Address, whole_tokens: u64, timestamp: TimestampMillis) {
        let entry = self.records.entry(address).or_default();
        entry.raw_score += whole_tokens;
        entry.last_activity_timestamp = timestamp;
    }

    /// `effective_score = raw_score * (1 - decay_rate)^days_since_activity`,
    /// computed lazily and never mutating the stored score (spec.md S4.4).
    pub fn effective_score(&self, address: &Address, now_timestamp: TimestampMillis) -> f64 {
        let Some(record) = self.records.get(address) else {
            return 0.0;
        };
        if record.raw_score == 0 {
            return 0.0;
        }
        let elapsed_ms = now_timestamp.saturating_sub(record.last_activity_timestamp) as f64;
        let days = elapsed_ms / MILLIS_PER_DAY;
        let decay_rate = self.decay_bps_per_day as f64 / 10_000.0;
        record.raw_score as f64 * (1.0 - decay_rate).powf(days)
    }

    /// Monotone, bounded map of effective score into [1, 10] (spec.md S4.4).
    /// The logarithmic curve is a concrete default (spec.md S9 open
    /// question); any other monotone bounded curve is compatible.
    pub fn priority_multiplier(&self, address: &Address, now_timestamp: TimestampMillis) -> f64 {
        let score = self.effective_score(address, now_timestamp);
        (1.0 + score.ln_1p()).min(10.0)
    }
}
