//! Pure reward arithmetic for one closed minting cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Tier, TierCounts, ALL_TIERS};

/// Share of each block's mint and of the cycle's service fees owed to one
/// tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierShare {
    /// Coins minted for the tier out of every block's reward.
    pub minted_per_block: f64,
    /// Fraction of the cycle's service fees for the tier (`0.05` = 5%).
    pub fees_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSchedule {
    /// Coins minted per minting cycle block.
    pub block_reward: f64,
    /// Minutes per minting cycle block. Not the chain's actual block time.
    pub block_cycle_minutes: f64,
    pub shares: BTreeMap<Tier, TierShare>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardBreakdown {
    /// Reward per member for each tier. An empty tier earns `0`, never NaN.
    pub per_tier: BTreeMap<Tier, f64>,
    pub duration_label: String,
}

impl RewardSchedule {
    pub fn share(&self, tier: Tier) -> TierShare {
        self.shares.get(&tier).copied().unwrap_or(TierShare {
            minted_per_block: 0.0,
            fees_fraction: 0.0,
        })
    }

    /// Reward per member on each tier for a cycle that minted `minted` coins
    /// and accumulated `fees` in service fees, given the active member
    /// counts. Pure: no I/O, no error path.
    pub fn calc_reward(&self, minted: f64, fees: f64, counts: &TierCounts) -> RewardBreakdown {
        let mut per_tier = BTreeMap::new();
        for tier in ALL_TIERS {
            let count = counts.get(tier);
            if count <= 0.0 {
                per_tier.insert(tier, 0.0);
                continue;
            }
            let share = self.share(tier);
            let reward = minted * share.minted_per_block / self.block_reward / count
                + fees * share.fees_fraction / count;
            per_tier.insert(tier, reward);
        }
        RewardBreakdown {
            per_tier,
            duration_label: self.duration_label(minted),
        }
    }

    /// Estimated accumulation time of the cycle implied by the minted
    /// balance, floored to whole minutes and rendered as `HH:MM`.
    pub fn duration_minutes(&self, minted: f64) -> f64 {
        minted / self.block_reward * self.block_cycle_minutes
    }

    pub fn duration_label(&self, minted: f64) -> String {
        let total_minutes = self.duration_minutes(minted).max(0.0) as u64;
        format!("{:02}:{:02}", total_minutes / 60, total_minutes % 60)
    }

    /// Smallest minted balance a cycle must reach before a drained pool is
    /// treated as a payout: `min_hours` worth of block rewards.
    pub fn min_payout(&self, min_hours: f64) -> f64 {
        self.block_reward * (min_hours * 60.0 / self.block_cycle_minutes)
    }
}

/// Estimated per-member hosting fee for one cycle, from the monthly USD rate
/// and the current coin price. Returns `(fee_coin, fee_usd)`; zero when the
/// price is unknown.
pub fn estimate_hosting_fee(
    duration_minutes: f64,
    fee_usd_per_month: f64,
    price_usd: f64,
) -> (f64, f64) {
    if price_usd <= 0.0 {
        return (0.0, 0.0);
    }
    let fee_per_hour = fee_usd_per_month / 30.0 / 24.0;
    let fee_usd = (duration_minutes / 60.0).ceil() * fee_per_hour;
    (fee_usd / price_usd, fee_usd)
}
