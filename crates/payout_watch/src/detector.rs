//! Payout detection from polled balances alone.
//!
//! The ledger emits no "payout happened" event; the detector infers a closed
//! cycle from a drained pool: the minted balance collapses to near zero
//! after the previous poll saw a balance worth alerting about.

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::reward::RewardSchedule;
use crate::types::RewardPoolSnapshot;

/// Mutable detection state, snapshotted alongside the payout records so a
/// restart resumes where the previous process stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorState {
    pub last_snapshot: Option<RewardPoolSnapshot>,
    /// When the most recent payout was observed; the baseline for the
    /// validity gate.
    pub last_payout_at_unix_ms: Option<i64>,
    pub started_at_unix_ms: i64,
    #[serde(default)]
    pub cooldown_until_unix_ms: i64,
    #[serde(default)]
    pub polls_observed: u64,
    #[serde(default)]
    pub closures_detected: u64,
}

impl DetectorState {
    pub fn new(started_at_unix_ms: i64) -> Self {
        Self {
            last_snapshot: None,
            last_payout_at_unix_ms: None,
            started_at_unix_ms,
            cooldown_until_unix_ms: 0,
            polls_observed: 0,
            closures_detected: 0,
        }
    }

    pub fn record_snapshot(&mut self, snapshot: RewardPoolSnapshot) {
        self.last_snapshot = Some(snapshot);
    }

    pub fn record_payout(&mut self, observed_at_unix_ms: i64, cooldown_until_unix_ms: i64) {
        self.last_payout_at_unix_ms = Some(observed_at_unix_ms);
        self.cooldown_until_unix_ms = cooldown_until_unix_ms;
        self.closures_detected = self.closures_detected.saturating_add(1);
    }
}

/// What one poll means for the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum PollDecision {
    /// No baseline yet; the reading becomes the first snapshot.
    Warming,
    /// Pool still accumulating; the reading becomes the new baseline.
    Tracking,
    /// The reading's implied duration contradicts the elapsed time; treat
    /// as an API glitch and keep the old baseline.
    Rejected {
        expected_minutes: f64,
        actual_minutes: f64,
    },
    /// A drain was observed inside the cooldown window.
    CooledDown { until_unix_ms: i64 },
    /// The pool was drained and restarted: the previous snapshot holds the
    /// distributed balances.
    CycleClosed { closed: RewardPoolSnapshot },
}

/// Fixed thresholds of the closure heuristic and validity gate.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorRule {
    pub block_reward: f64,
    pub block_cycle_minutes: f64,
    /// Smallest previous-snapshot balance a drain may close on.
    pub min_payout: f64,
    /// Largest post-drain balance still considered "reset". A fresh pool can
    /// accrue up to two cycles of mint between polls.
    pub closure_threshold: f64,
    pub cooldown_ms: i64,
}

impl DetectorRule {
    pub fn new(schedule: &RewardSchedule, config: &DetectorConfig) -> Self {
        Self {
            block_reward: schedule.block_reward,
            block_cycle_minutes: schedule.block_cycle_minutes,
            min_payout: schedule.min_payout(config.min_accumulation_hours),
            closure_threshold: schedule.block_reward * 2.0,
            cooldown_ms: (config.cooldown_minutes * 60_000.0) as i64,
        }
    }

    /// Classifies one poll. Pure: the caller applies the resulting state
    /// change, so an aborted closure (tier counts unavailable) leaves the
    /// baseline untouched and the next tick re-detects.
    pub fn evaluate(&self, state: &DetectorState, minted: f64, now_unix_ms: i64) -> PollDecision {
        if let Some(prev) = &state.last_snapshot {
            let drained = minted <= self.closure_threshold && minted < prev.minted;
            if drained && prev.minted > 0.0 && prev.minted > self.min_payout {
                if now_unix_ms < state.cooldown_until_unix_ms {
                    return PollDecision::CooledDown {
                        until_unix_ms: state.cooldown_until_unix_ms,
                    };
                }
                return PollDecision::CycleClosed {
                    closed: prev.clone(),
                };
            }
        }

        // The gate needs a trusted reference point; before the first
        // recorded payout there is none, and elapsed-since-start never
        // converges with the pool's accumulation age.
        if let Some(last_payout_at) = state.last_payout_at_unix_ms {
            let expected_minutes = minted / self.block_reward * self.block_cycle_minutes;
            let actual_minutes = (now_unix_ms - last_payout_at) as f64 / 60_000.0;
            if (actual_minutes - expected_minutes).abs() > self.block_cycle_minutes {
                return PollDecision::Rejected {
                    expected_minutes,
                    actual_minutes,
                };
            }
        }

        if state.last_snapshot.is_none() {
            PollDecision::Warming
        } else {
            PollDecision::Tracking
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::reward::TierShare;
    use crate::types::Tier;

    const MINUTE_MS: i64 = 60_000;

    fn rule() -> DetectorRule {
        let mut shares = std::collections::BTreeMap::new();
        shares.insert(
            Tier::T1,
            TierShare {
                minted_per_block: 5.0,
                fees_fraction: 0.05,
            },
        );
        let schedule = RewardSchedule {
            block_reward: 38.0,
            block_cycle_minutes: 4.0,
            shares,
        };
        DetectorRule::new(&schedule, &DetectorConfig::default())
    }

    fn snapshot(minted: f64, fees: f64, observed_at_unix_ms: i64) -> RewardPoolSnapshot {
        RewardPoolSnapshot {
            minted,
            fees,
            observed_at_unix_ms,
        }
    }

    /// Sets the payout baseline so that a reading of `minted` at `now`
    /// passes the validity gate exactly.
    fn aligned_state(minted: f64, now: i64, rule: &DetectorRule) -> DetectorState {
        let expected_minutes = minted / rule.block_reward * rule.block_cycle_minutes;
        let mut state = DetectorState::new(0);
        state.last_payout_at_unix_ms = Some(now - (expected_minutes * 60_000.0) as i64);
        state
    }

    #[test]
    fn thresholds_derive_from_the_schedule() {
        let rule = rule();
        assert_eq!(rule.min_payout, 4_560.0);
        assert_eq!(rule.closure_threshold, 76.0);
        assert_eq!(rule.cooldown_ms, 480 * MINUTE_MS);
    }

    #[test]
    fn first_reading_warms_the_detector() {
        let rule = rule();
        let state = DetectorState::new(1_000);
        assert_eq!(
            rule.evaluate(&state, 5_000.0, 1_000),
            PollDecision::Warming
        );
    }

    #[test]
    fn accumulating_pool_keeps_tracking_without_a_payout() {
        let rule = rule();
        let now = 100 * MINUTE_MS;
        let mut state = aligned_state(6_000.0, now, &rule);
        state.record_snapshot(snapshot(5_962.0, 50.0, now - 2 * MINUTE_MS));
        assert_eq!(rule.evaluate(&state, 6_000.0, now), PollDecision::Tracking);
    }

    #[test]
    fn drained_pool_closes_on_the_previous_snapshot() {
        let rule = rule();
        let now = 2_000 * MINUTE_MS;
        let mut state = DetectorState::new(0);
        state.last_payout_at_unix_ms = Some(now - 1_300 * MINUTE_MS);
        state.record_snapshot(snapshot(12_000.0, 50.0, now - 2 * MINUTE_MS));

        match rule.evaluate(&state, 40.0, now) {
            PollDecision::CycleClosed { closed } => {
                assert_eq!(closed.minted, 12_000.0);
                assert_eq!(closed.fees, 50.0);
            }
            other => panic!("expected closure, got {other:?}"),
        }
    }

    #[test]
    fn small_pools_never_close_below_the_minimum_payout() {
        let rule = rule();
        let now = 500 * MINUTE_MS;
        let mut state = aligned_state(20.0, now, &rule);
        // 1000 < min_payout of 4560: a drain of this pool is noise.
        state.record_snapshot(snapshot(1_000.0, 5.0, now - 2 * MINUTE_MS));
        assert_ne!(
            std::mem::discriminant(&rule.evaluate(&state, 20.0, now)),
            std::mem::discriminant(&PollDecision::CycleClosed {
                closed: snapshot(0.0, 0.0, 0)
            })
        );
    }

    #[test]
    fn implausible_reading_is_rejected_and_keeps_the_baseline() {
        let rule = rule();
        let now = 1_000 * MINUTE_MS;
        let mut state = DetectorState::new(0);
        // Last payout 10 minutes ago, but the reading implies ~1263 minutes
        // of accumulation: a glitched response.
        state.last_payout_at_unix_ms = Some(now - 10 * MINUTE_MS);
        state.record_snapshot(snapshot(80.0, 1.0, now - 2 * MINUTE_MS));

        match rule.evaluate(&state, 12_000.0, now) {
            PollDecision::Rejected {
                expected_minutes,
                actual_minutes,
            } => {
                assert!((expected_minutes - 12_000.0 / 38.0 * 4.0).abs() < 1e-9);
                assert!((actual_minutes - 10.0).abs() < 1e-9);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn reading_within_one_cycle_of_expectation_passes_the_gate() {
        let rule = rule();
        let now = 5_000 * MINUTE_MS;
        let mut state = aligned_state(3_800.0, now, &rule);
        state.record_snapshot(snapshot(3_762.0, 10.0, now - 2 * MINUTE_MS));
        assert_eq!(rule.evaluate(&state, 3_800.0, now), PollDecision::Tracking);
    }

    #[test]
    fn unchanged_sequence_never_constructs_a_payout() {
        let rule = rule();
        let mut state = DetectorState::new(0);
        let mut now = 0;
        for _ in 0..10 {
            now += 2 * MINUTE_MS;
            let minted = 38.0 / 4.0 * (now as f64 / 60_000.0);
            let decision = rule.evaluate(&state, minted, now);
            assert!(
                !matches!(decision, PollDecision::CycleClosed { .. }),
                "no reset in the sequence, got {decision:?}"
            );
            if !matches!(decision, PollDecision::Rejected { .. }) {
                state.record_snapshot(snapshot(minted, 0.0, now));
            }
        }
    }

    #[test]
    fn cooldown_suppresses_back_to_back_closures() {
        let rule = rule();
        let now = 10_000 * MINUTE_MS;
        let mut state = DetectorState::new(0);
        state.record_snapshot(snapshot(12_000.0, 50.0, now - 2 * MINUTE_MS));
        state.cooldown_until_unix_ms = now + 60 * MINUTE_MS;

        match rule.evaluate(&state, 40.0, now) {
            PollDecision::CooledDown { until_unix_ms } => {
                assert_eq!(until_unix_ms, now + 60 * MINUTE_MS);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        // Once the window passes the same drain closes normally.
        state.cooldown_until_unix_ms = now - 1;
        assert!(matches!(
            rule.evaluate(&state, 40.0, now),
            PollDecision::CycleClosed { .. }
        ));
    }

    #[test]
    fn state_snapshot_deserializes_from_legacy_documents() {
        let legacy = serde_json::json!({
            "last_snapshot": null,
            "last_payout_at_unix_ms": 5_000,
            "started_at_unix_ms": 1_000
        });
        let state: DetectorState = serde_json::from_value(legacy).expect("deserialize legacy");
        assert_eq!(state.cooldown_until_unix_ms, 0);
        assert_eq!(state.polls_observed, 0);
        assert_eq!(state.last_payout_at_unix_ms, Some(5_000));
    }
}
