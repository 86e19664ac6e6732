use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::ops::RangeInclusive;

/// Largest number of shares a single fill may take
pub const MAX_FILL_SHARES: i32 = 100;

/// Fill cost range in cents ($1.00 ..= $99.99)
pub const FILL_COST_CENTS: RangeInclusive<i64> = 100..=9999;

/// Shares and cost chosen for one fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPlan {
    pub shares: i32,
    pub cost: Decimal,
}

impl FillPlan {
    pub fn new(shares: i32, cost: Decimal) -> Self {
        Self { shares, cost }
    }

    /// Unit price, rounded half-to-even to cents
    pub fn price(&self) -> Decimal {
        (self.cost / Decimal::from(self.shares)).round_dp(2)
    }

    /// Whether this plan can be applied to an order with `remaining_shares`
    pub fn fits(&self, remaining_shares: i32) -> bool {
        self.shares >= 1 && self.shares <= remaining_shares && self.cost > Decimal::ZERO
    }
}

/// Chooses the size of the next fill for an order with `remaining_shares` > 0.
///
/// Shared by every worker, so implementations synchronise internally.
/// Plans must satisfy [`FillPlan::fits`].
pub trait FillSizer: Send + Sync {
    fn plan(&self, remaining_shares: i32) -> FillPlan;
}

/// Uniformly random fill sizes
#[derive(Debug)]
pub struct RandomFillSizer {
    rng: Mutex<StdRng>,
    max_shares: i32,
    cost_cents: RangeInclusive<i64>,
}

impl RandomFillSizer {
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            max_shares: MAX_FILL_SHARES,
            cost_cents: FILL_COST_CENTS,
        }
    }
}

impl Default for RandomFillSizer {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl FillSizer for RandomFillSizer {
    fn plan(&self, remaining_shares: i32) -> FillPlan {
        let upper = remaining_shares.min(self.max_shares).max(1);
        let mut rng = self.rng.lock();
        let shares = rng.gen_range(1..=upper);
        let cents = rng.gen_range(self.cost_cents.clone());
        FillPlan::new(shares, Decimal::new(cents, 2))
    }
}
