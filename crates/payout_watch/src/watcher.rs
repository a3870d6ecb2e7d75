//! The watcher engine: one poll pipeline from balances to delivered,
//! persisted payout alerts. Driven by a single timer thread; the manual
//! operator entry points reuse the same calculator and dispatcher.

use std::collections::BTreeMap;

use crate::config::WatchConfig;
use crate::detector::{DetectorRule, DetectorState, PollDecision};
use crate::dispatch::{AlertDispatcher, MessageSender};
use crate::error::WatchError;
use crate::feed::FileConfirmationFeed;
use crate::oracle::BalanceOracle;
use crate::price::PriceFeed;
use crate::reward::{estimate_hosting_fee, RewardSchedule};
use crate::store::WatchStateStore;
use crate::types::{ConfirmationRecord, Payout, RewardPoolSnapshot, TierCounts};

/// What one timer tick amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    OracleUnavailable { reason: String },
    Warming,
    Tracking,
    Rejected { expected_minutes: f64, actual_minutes: f64 },
    CooledDown { until_unix_ms: i64 },
    /// A closure was detected but no payout could be constructed; the
    /// baseline is untouched so the next tick re-detects.
    Deferred { reason: String },
    /// The cycle's confirmation was consumed by an earlier run; no second
    /// alert.
    AlreadyProcessed { confirmation_id: String },
    CycleClosed { payout: Box<Payout> },
}

pub struct PayoutWatcher<O: BalanceOracle, S: MessageSender> {
    schedule: RewardSchedule,
    rule: DetectorRule,
    hosting_fee_usd_per_month: f64,
    oracle: O,
    dispatcher: AlertDispatcher<S>,
    price: Option<Box<dyn PriceFeed>>,
    store: WatchStateStore,
    feed: Option<FileConfirmationFeed>,
    state: DetectorState,
}

impl<O: BalanceOracle, S: MessageSender> PayoutWatcher<O, S> {
    pub fn new(
        config: &WatchConfig,
        oracle: O,
        sender: S,
        price: Option<Box<dyn PriceFeed>>,
        store: WatchStateStore,
        feed: Option<FileConfirmationFeed>,
        started_at_unix_ms: i64,
    ) -> Result<Self, WatchError> {
        let schedule = config.reward_schedule();
        let rule = DetectorRule::new(&schedule, &config.detector);
        let dispatcher = AlertDispatcher::new(
            sender,
            config.alert.message_limit,
            config.alert.explorer_homepage.clone(),
        );
        let mut state = DetectorState::new(started_at_unix_ms);
        // The stored payout is the source of truth at startup; it anchors
        // the validity gate across restarts.
        if let Some(last) = store.load_last_payout()? {
            state.last_payout_at_unix_ms = Some(last.observed_at_unix_ms);
        }
        Ok(Self {
            schedule,
            rule,
            hosting_fee_usd_per_month: config.price.hosting_fee_usd_per_month,
            oracle,
            dispatcher,
            price,
            store,
            feed,
            state,
        })
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn store(&self) -> &WatchStateStore {
        &self.store
    }

    /// One detector poll. Never panics and never returns an error: every
    /// failure mode is a report variant or a log line, and the next tick
    /// starts clean.
    pub fn tick(&mut self, now_unix_ms: i64) -> TickReport {
        let (minted, fees) = match self.oracle.pool_balances() {
            Ok(balances) => balances,
            Err(err) => {
                eprintln!("[watcher] pool balance poll failed: {err}");
                return TickReport::OracleUnavailable {
                    reason: err.to_string(),
                };
            }
        };
        self.state.polls_observed = self.state.polls_observed.saturating_add(1);
        let reading = RewardPoolSnapshot {
            minted,
            fees,
            observed_at_unix_ms: now_unix_ms,
        };
        match self.rule.evaluate(&self.state, minted, now_unix_ms) {
            PollDecision::Warming => {
                self.state.record_snapshot(reading);
                TickReport::Warming
            }
            PollDecision::Tracking => {
                self.state.record_snapshot(reading);
                TickReport::Tracking
            }
            PollDecision::Rejected {
                expected_minutes,
                actual_minutes,
            } => {
                eprintln!(
                    "[watcher] reading rejected: implies {expected_minutes:.1} min accumulated, \
                     {actual_minutes:.1} min elapsed since last payout"
                );
                TickReport::Rejected {
                    expected_minutes,
                    actual_minutes,
                }
            }
            PollDecision::CooledDown { until_unix_ms } => {
                eprintln!("[watcher] drain observed inside cooldown window, not alerting");
                self.state.record_snapshot(reading);
                TickReport::CooledDown { until_unix_ms }
            }
            PollDecision::CycleClosed { closed } => {
                self.handle_closure(closed, reading, now_unix_ms)
            }
        }
    }

    /// Operator path: alert for explicitly supplied balances, bypassing the
    /// closure heuristic but reusing the calculator and dispatcher.
    pub fn trigger_manual(
        &mut self,
        minted: f64,
        fees: f64,
        now_unix_ms: i64,
    ) -> Result<String, WatchError> {
        if minted <= 0.0 || minted < self.rule.min_payout {
            return Err(WatchError::Trigger {
                reason: format!(
                    "minted total required, must be at least {:.0}",
                    self.rule.min_payout
                ),
            });
        }
        let counts =
            self.tier_counts_with_retry(now_unix_ms)
                .map_err(|err| WatchError::Trigger {
                    reason: format!("tier distribution unavailable: {err}"),
                })?;
        if counts.any_zero() {
            return Err(WatchError::Trigger {
                reason: format!(
                    "invalid tier distribution received: t1 {:.0}, t2 {:.0}, t3 {:.0}, t4 {:.0}",
                    counts.t1, counts.t2, counts.t3, counts.t4
                ),
            });
        }

        let closed = RewardPoolSnapshot {
            minted,
            fees,
            observed_at_unix_ms: now_unix_ms,
        };
        let confirmation = self.latest_confirmation().filter(|record| !record.processed);
        let mut payout = self.build_payout(&closed, counts, confirmation.as_ref());
        let targets = self.load_targets();
        let outcome = self.dispatcher.dispatch(&payout, &targets);
        let summary = format!(
            "Payout alert sent.\nTotal targets: {}\nSuccess: {}\nFailed: {}",
            outcome.total_targets, outcome.success_count, outcome.fail_count
        );
        payout.alert = Some(outcome);
        self.persist_payout(&payout);
        if let Some(record) = &confirmation {
            self.mark_confirmation(&record.confirmation_id);
        }
        self.state
            .record_payout(payout.observed_at_unix_ms, now_unix_ms + self.rule.cooldown_ms);
        Ok(summary)
    }

    /// Operator correction path: recompute the last alerted payout with new
    /// balances and edit the already-sent messages in place.
    pub fn update_last_alert(
        &mut self,
        minted: f64,
        fees: f64,
        now_unix_ms: i64,
    ) -> Result<String, WatchError> {
        let previous = self
            .store
            .load_last_payout()?
            .ok_or_else(|| WatchError::Trigger {
                reason: "no payout on record to update".to_string(),
            })?;
        let counts =
            self.tier_counts_with_retry(now_unix_ms)
                .map_err(|err| WatchError::Trigger {
                    reason: format!("tier distribution unavailable: {err}"),
                })?;
        let closed = RewardPoolSnapshot {
            minted,
            fees,
            observed_at_unix_ms: previous.observed_at_unix_ms,
        };
        let mut payout = self.build_payout(&closed, counts, None);
        payout.block_number = previous.block_number;

        let refs: BTreeMap<String, String> = previous
            .alert
            .iter()
            .flat_map(|alert| alert.deliveries.iter())
            .filter(|record| record.delivered)
            .filter_map(|record| {
                record
                    .message_ref
                    .clone()
                    .map(|message_ref| (record.destination_id.clone(), message_ref))
            })
            .collect();
        let outcome = self.dispatcher.update(&payout, &refs);
        let summary = format!(
            "Payout alert updated.\nTotal targets: {}\nSuccess: {}\nFailed: {}",
            outcome.total_targets, outcome.success_count, outcome.fail_count
        );
        payout.alert = Some(outcome);
        self.persist_payout(&payout);
        Ok(summary)
    }

    fn handle_closure(
        &mut self,
        closed: RewardPoolSnapshot,
        reading: RewardPoolSnapshot,
        now_unix_ms: i64,
    ) -> TickReport {
        let counts = match self.tier_counts_with_retry(now_unix_ms) {
            Ok(counts) => counts,
            Err(err) => {
                eprintln!("[watcher] closure detected but no tier counts, deferring: {err}");
                return TickReport::Deferred {
                    reason: err.to_string(),
                };
            }
        };

        let confirmation = self.latest_confirmation();
        if let Some(record) = &confirmation {
            if record.processed {
                self.state.record_snapshot(reading);
                self.state
                    .record_payout(closed.observed_at_unix_ms, now_unix_ms + self.rule.cooldown_ms);
                eprintln!(
                    "[watcher] cycle already alerted under confirmation {}, skipping dispatch",
                    record.confirmation_id
                );
                return TickReport::AlreadyProcessed {
                    confirmation_id: record.confirmation_id.clone(),
                };
            }
        }

        let mut payout = self.build_payout(&closed, counts, confirmation.as_ref());
        let targets = self.load_targets();
        let outcome = self.dispatcher.dispatch(&payout, &targets);
        payout.alert = Some(outcome);
        self.persist_payout(&payout);
        if let Some(record) = &confirmation {
            self.mark_confirmation(&record.confirmation_id);
        }
        self.state.record_snapshot(reading);
        self.state
            .record_payout(payout.observed_at_unix_ms, now_unix_ms + self.rule.cooldown_ms);
        TickReport::CycleClosed {
            payout: Box::new(payout),
        }
    }

    fn build_payout(
        &self,
        closed: &RewardPoolSnapshot,
        counts: TierCounts,
        confirmation: Option<&ConfirmationRecord>,
    ) -> Payout {
        let breakdown = self.schedule.calc_reward(closed.minted, closed.fees, &counts);
        let (price_usd, hosting_fee_coin, hosting_fee_usd) = self.hosting_fee(closed.minted);
        Payout {
            minted: closed.minted,
            fees: closed.fees,
            total: closed.minted + closed.fees,
            duration_label: breakdown.duration_label,
            observed_at_unix_ms: confirmation
                .map(|record| record.observed_at_unix_ms)
                .unwrap_or(closed.observed_at_unix_ms),
            tier_rewards: breakdown.per_tier,
            tier_counts: counts,
            hosting_fee_coin,
            hosting_fee_usd,
            price_usd,
            block_number: confirmation.map(|record| record.block_number),
            alert: None,
        }
    }

    fn hosting_fee(&self, minted: f64) -> (f64, f64, f64) {
        let feed = match &self.price {
            Some(feed) => feed,
            None => return (0.0, 0.0, 0.0),
        };
        match feed.latest_price_usd() {
            Ok(price_usd) if price_usd > 0.0 => {
                let (fee_coin, fee_usd) = estimate_hosting_fee(
                    self.schedule.duration_minutes(minted),
                    self.hosting_fee_usd_per_month,
                    price_usd,
                );
                (price_usd, fee_coin, fee_usd)
            }
            Ok(_) => (0.0, 0.0, 0.0),
            Err(err) => {
                eprintln!("[watcher] price feed unavailable, skipping hosting fee: {err}");
                (0.0, 0.0, 0.0)
            }
        }
    }

    /// Tier counts with one retry: a flaky gateway occasionally reports
    /// sub-one counts or fails outright. A degenerate second answer is used
    /// as-is; a failed second fetch after a degenerate first keeps the first.
    fn tier_counts_with_retry(&self, now_unix_ms: i64) -> Result<TierCounts, WatchError> {
        match self.oracle.tier_counts(now_unix_ms) {
            Ok(counts) if !counts.any_below_one() => Ok(counts),
            Ok(first) => {
                eprintln!("[watcher] degenerate tier counts {first:?}, retrying once");
                match self.oracle.tier_counts(now_unix_ms) {
                    Ok(second) => Ok(second),
                    Err(err) => {
                        eprintln!("[watcher] tier count retry failed, keeping first: {err}");
                        Ok(first)
                    }
                }
            }
            Err(err) => {
                eprintln!("[watcher] tier count fetch failed, retrying once: {err}");
                self.oracle.tier_counts(now_unix_ms)
            }
        }
    }

    fn latest_confirmation(&self) -> Option<ConfirmationRecord> {
        let feed = self.feed.as_ref()?;
        match feed.latest() {
            Ok(latest) => latest,
            Err(err) => {
                eprintln!("[watcher] confirmation feed read failed: {err}");
                None
            }
        }
    }

    fn mark_confirmation(&self, confirmation_id: &str) {
        if let Some(feed) = &self.feed {
            persist_with_retry("confirmation flag", || feed.mark_processed(confirmation_id));
        }
    }

    fn load_targets(&self) -> BTreeMap<String, String> {
        match self.store.load_subscriptions() {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                eprintln!("[watcher] subscription load failed, alerting nobody: {err}");
                BTreeMap::new()
            }
        }
    }

    fn persist_payout(&self, payout: &Payout) {
        persist_with_retry("last payout", || self.store.save_last_payout(payout));
        persist_with_retry("payout log", || self.store.append_payout_log(payout));
    }
}

/// One retry, then log and drop: losing a persisted record must not take
/// the detector down with it.
fn persist_with_retry<F>(label: &str, mut op: F)
where
    F: FnMut() -> Result<(), WatchError>,
{
    if let Err(first) = op() {
        eprintln!("[watcher] persist {label} failed, retrying once: {first}");
        if let Err(second) = op() {
            eprintln!("[watcher] persist {label} failed again, record lost for this cycle: {second}");
        }
    }
}
