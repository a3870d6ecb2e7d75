use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Participant class of the reward pool, ordered by collateral requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "t1")]
    T1,
    #[serde(rename = "t2")]
    T2,
    #[serde(rename = "t3")]
    T3,
    #[serde(rename = "t4")]
    T4,
}

pub const ALL_TIERS: [Tier; 4] = [Tier::T1, Tier::T2, Tier::T3, Tier::T4];

impl Tier {
    pub fn key(&self) -> &'static str {
        match self {
            Tier::T1 => "t1",
            Tier::T2 => "t2",
            Tier::T3 => "t3",
            Tier::T4 => "t4",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Tier::T1 => 1,
            Tier::T2 => 2,
            Tier::T3 => 3,
            Tier::T4 => 4,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One poll of the reward pool: accumulated minted coins and service fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPoolSnapshot {
    pub minted: f64,
    pub fees: f64,
    pub observed_at_unix_ms: i64,
}

/// Active member count per tier. All four tiers are always present; zero is
/// a valid count and means an empty tier, not missing data.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TierCounts {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub t4: f64,
}

impl TierCounts {
    pub fn new(t1: f64, t2: f64, t3: f64, t4: f64) -> Self {
        Self { t1, t2, t3, t4 }
    }

    pub fn get(&self, tier: Tier) -> f64 {
        match tier {
            Tier::T1 => self.t1,
            Tier::T2 => self.t2,
            Tier::T3 => self.t3,
            Tier::T4 => self.t4,
        }
    }

    pub fn set(&mut self, tier: Tier, value: f64) {
        match tier {
            Tier::T1 => self.t1 = value,
            Tier::T2 => self.t2 = value,
            Tier::T3 => self.t3 = value,
            Tier::T4 => self.t4 = value,
        }
    }

    /// A count below one signals a degenerate oracle reading for that tier.
    pub fn any_below_one(&self) -> bool {
        ALL_TIERS.iter().any(|tier| self.get(*tier) < 1.0)
    }

    pub fn any_zero(&self) -> bool {
        ALL_TIERS.iter().any(|tier| self.get(*tier) == 0.0)
    }
}

/// The computed record of one completed minting cycle's distribution.
///
/// Constructed exactly once per detected cycle; immutable afterwards except
/// for `alert`, which the dispatcher fills in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub minted: f64,
    pub fees: f64,
    pub total: f64,
    /// Estimated accumulation time of the cycle, "HH:MM".
    pub duration_label: String,
    pub observed_at_unix_ms: i64,
    /// Reward per member for each tier.
    pub tier_rewards: BTreeMap<Tier, f64>,
    pub tier_counts: TierCounts,
    #[serde(default)]
    pub hosting_fee_coin: f64,
    #[serde(default)]
    pub hosting_fee_usd: f64,
    #[serde(default)]
    pub price_usd: f64,
    #[serde(default)]
    pub block_number: Option<i64>,
    #[serde(default)]
    pub alert: Option<AlertOutcome>,
}

/// Summary of one fan-out pass over the subscribed destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOutcome {
    pub total_targets: u32,
    pub success_count: u32,
    pub fail_count: u32,
    pub deliveries: Vec<DeliveryRecord>,
}

/// Per-destination delivery result, written for failures as well as
/// successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub destination_id: String,
    pub delivered: bool,
    #[serde(default)]
    pub error_text: Option<String>,
    #[serde(default)]
    pub message_ref: Option<String>,
}

/// A settlement transaction observed by the external confirmation receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub confirmation_id: String,
    pub block_number: i64,
    pub observed_at_unix_ms: i64,
    #[serde(default)]
    pub processed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_keys_are_stable() {
        assert_eq!(Tier::T1.key(), "t1");
        assert_eq!(Tier::T4.key(), "t4");
        assert_eq!(ALL_TIERS.len(), 4);
    }

    #[test]
    fn tier_reward_map_round_trips_as_json() {
        let mut rewards = BTreeMap::new();
        rewards.insert(Tier::T1, 151.0);
        rewards.insert(Tier::T2, 100.5);
        let json = serde_json::to_string(&rewards).expect("serialize");
        assert!(json.contains("\"t1\""));
        let back: BTreeMap<Tier, f64> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, rewards);
    }

    #[test]
    fn tier_counts_degeneracy_checks() {
        let healthy = TierCounts::new(10.0, 8.0, 4.0, 2.0);
        assert!(!healthy.any_below_one());
        assert!(!healthy.any_zero());

        let degenerate = TierCounts::new(10.0, 0.5, 4.0, 2.0);
        assert!(degenerate.any_below_one());
        assert!(!degenerate.any_zero());

        let empty_tier = TierCounts::new(10.0, 8.0, 0.0, 2.0);
        assert!(empty_tier.any_zero());
    }

    #[test]
    fn payout_deserializes_without_optional_fields() {
        let legacy = serde_json::json!({
            "minted": 11400.0,
            "fees": 200.0,
            "total": 11600.0,
            "duration_label": "20:00",
            "observed_at_unix_ms": 1_000,
            "tier_rewards": { "t1": 151.0 },
            "tier_counts": { "t1": 10.0, "t2": 8.0, "t3": 4.0, "t4": 2.0 }
        });
        let payout: Payout = serde_json::from_value(legacy).expect("deserialize legacy");
        assert_eq!(payout.block_number, None);
        assert!(payout.alert.is_none());
        assert_eq!(payout.hosting_fee_coin, 0.0);
    }
}
