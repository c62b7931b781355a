// Fixed-point Amount (spec.md S3: 18 fractional digits, non-negative).
//
// Consensus-critical arithmetic must be exact and deterministic across every
// node, so balances and fee splits are integer raw units rather than floats,
// the same convention the teacher uses for its SCALE-based reputation and
// fee arithmetic (see common/src/ai_mining/reputation.rs upstream).

use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error as FmtError, Formatter};
use std::ops::{Add, Sub};

pub const DECIMALS: u32 = 18;
pub const ONE: u128 = 10u128.pow(DECIMALS);

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_raw(raw: u128) -> Self {
        Amount(raw)
    }

    /// Construct from a whole-token count (e.g. `Amount::from_tokens(1024)`
    /// for the genesis block reward in spec.md S8 scenario 1).
    pub const fn from_tokens(tokens: u64) -> Self {
        Amount(tokens as u128 * ONE)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Whole-token part, used by the reputation engine's "floor(amount)"
    /// burn-point rule (spec.md S4.4).
    pub fn floor_tokens(&self) -> u64 {
        (self.0 / ONE) as u64
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Split `self` into three parts matching the ratios (num_a, num_b,
    /// num_c) over `denom`, with any integer-division remainder folded into
    /// the first part so the three parts always sum back to `self` exactly
    /// (spec.md S8 P6 "split conservation... to the last fixed-point digit").
    pub fn split_three(&self, num_a: u64, num_b: u64, num_c: u64, denom: u64) -> (Amount, Amount, Amount) {
        let total = self.0;
        let part_b = total * num_b as u128 / denom as u128;
        let part_c = total * num_c as u128 / denom as u128;
        let part_a = total - part_b - part_c;
        (Amount(part_a), Amount(part_b), Amount(part_c))
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}.{:018}", self.0 / ONE, self.0 % ONE)
    }
}

impl Serializer for Amount {
    fn write(&self, writer: &mut Writer) {
        writer.write_u128(self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Amount(reader.read_u128()?))
    }

    fn size(&self) -> usize {
        16
    }
}
