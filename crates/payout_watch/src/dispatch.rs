//! Alert fan-out with per-destination failure isolation.

use std::collections::BTreeMap;

use crate::error::WatchError;
use crate::format::{fill_or_limit, format_num, format_ts, split_for_limit, DASH_LINE};
use crate::types::{AlertOutcome, DeliveryRecord, Payout, ALL_TIERS};

/// Outbound messaging collaborator. Implementations wrap one chat platform
/// session; `send` returns a message reference usable for later edits.
pub trait MessageSender {
    fn send(&self, destination_id: &str, text: &str) -> Result<String, WatchError>;
    fn edit(
        &self,
        destination_id: &str,
        message_ref: &str,
        text: &str,
    ) -> Result<String, WatchError>;
}

#[derive(Debug)]
pub struct AlertDispatcher<S: MessageSender> {
    sender: S,
    message_limit: usize,
    explorer_homepage: Option<String>,
}

impl<S: MessageSender> AlertDispatcher<S> {
    pub fn new(sender: S, message_limit: usize, explorer_homepage: Option<String>) -> Self {
        Self {
            sender,
            message_limit,
            explorer_homepage,
        }
    }

    #[cfg(test)]
    pub(crate) fn sender(&self) -> &S {
        &self.sender
    }

    /// Sends the payout alert to every target. A failing target is recorded
    /// and skipped, never aborting the loop; every target gets a
    /// `DeliveryRecord` whether it succeeded or not.
    pub fn dispatch(&self, payout: &Payout, targets: &BTreeMap<String, String>) -> AlertOutcome {
        let text = self.build_alert_text(payout);
        let mut deliveries = Vec::with_capacity(targets.len());
        let mut success_count = 0u32;
        for (destination_id, label) in targets {
            match self.deliver(destination_id, &text) {
                Ok(message_ref) => {
                    success_count += 1;
                    deliveries.push(DeliveryRecord {
                        destination_id: destination_id.clone(),
                        delivered: true,
                        error_text: None,
                        message_ref: Some(message_ref),
                    });
                }
                Err(err) => {
                    eprintln!("[dispatch] payout alert to {destination_id} ({label}) failed: {err}");
                    deliveries.push(DeliveryRecord {
                        destination_id: destination_id.clone(),
                        delivered: false,
                        error_text: Some(err.to_string()),
                        message_ref: None,
                    });
                }
            }
        }
        let total_targets = targets.len() as u32;
        let outcome = AlertOutcome {
            total_targets,
            success_count,
            fail_count: total_targets - success_count,
            deliveries,
        };
        eprintln!(
            "[dispatch] payout alert summary: total {} | success {} | failed {}",
            outcome.total_targets, outcome.success_count, outcome.fail_count
        );
        outcome
    }

    /// Edits the previously sent alert messages in place, one per stored
    /// message reference, under the same isolation contract as `dispatch`.
    pub fn update(&self, payout: &Payout, refs: &BTreeMap<String, String>) -> AlertOutcome {
        let text = self.build_alert_text(payout);
        let mut deliveries = Vec::with_capacity(refs.len());
        let mut success_count = 0u32;
        for (destination_id, message_ref) in refs {
            match self.sender.edit(destination_id, message_ref, &text) {
                Ok(new_ref) => {
                    success_count += 1;
                    deliveries.push(DeliveryRecord {
                        destination_id: destination_id.clone(),
                        delivered: true,
                        error_text: None,
                        message_ref: Some(new_ref),
                    });
                }
                Err(err) => {
                    eprintln!("[dispatch] payout alert edit at {destination_id} failed: {err}");
                    deliveries.push(DeliveryRecord {
                        destination_id: destination_id.clone(),
                        delivered: false,
                        error_text: Some(err.to_string()),
                        message_ref: Some(message_ref.clone()),
                    });
                }
            }
        }
        let total_targets = refs.len() as u32;
        AlertOutcome {
            total_targets,
            success_count,
            fail_count: total_targets - success_count,
            deliveries,
        }
    }

    /// Sends `text` to one destination, splitting at line breaks when it
    /// exceeds the platform limit. Returns the reference of the last chunk,
    /// which is the message later edits target.
    fn deliver(&self, destination_id: &str, text: &str) -> Result<String, WatchError> {
        let mut last_ref = String::new();
        for chunk in split_for_limit(text, self.message_limit) {
            if chunk.trim().is_empty() {
                continue;
            }
            last_ref = self.sender.send(destination_id, chunk)?;
        }
        Ok(last_ref)
    }

    pub fn build_alert_text(&self, payout: &Payout) -> String {
        let mut text = String::from("Delicious payout is served!```js\n");
        text.push_str(&format!(
            "Time   : {} UTC (approx.)\n",
            format_ts(payout.observed_at_unix_ms)
        ));
        text.push_str(DASH_LINE);
        text.push_str(&format!(
            "Minted : {} | Fees     : {}\n",
            fill_or_limit(&format_num(payout.minted, 0), 10),
            fill_or_limit(&format_num(payout.fees, 0), 10),
        ));
        text.push_str(DASH_LINE);
        text.push_str(&format!(
            "Total  : {} | Duration : {}\n",
            fill_or_limit(&format_num(payout.total, 0), 10),
            payout.duration_label,
        ));
        if payout.hosting_fee_usd > 0.0 {
            text.push_str(DASH_LINE);
            text.push_str(&format!(
                "Hosting Fee/MN: ${} ({}H) @ ${}/H\n",
                format_num(payout.hosting_fee_usd, 4),
                format_num(payout.hosting_fee_coin, 0),
                format_num(payout.price_usd, 6),
            ));
        }
        text.push_str(DASH_LINE);
        text.push_str("Tier 1     | Tier 2     | Tier 3     | Tier 4\n");
        text.push_str(DASH_LINE);
        let row: Vec<String> = ALL_TIERS
            .iter()
            .map(|tier| {
                let reward = payout.tier_rewards.get(tier).copied().unwrap_or(0.0);
                fill_or_limit(&format_num(reward, 0), 10)
            })
            .collect();
        text.push_str(&row.join(" | "));
        text.push_str("\n```\n");
        if let (Some(homepage), Some(block_number)) =
            (&self.explorer_homepage, payout.block_number)
        {
            text.push_str(&format!("{homepage}/block/{block_number}\n"));
        }
        text.push_str(
            "```fix\nDisclaimer: Actual amount received may vary from the amounts \
             displayed due to the tier distribution returned by the ledger \
             including ineligible member statuses.```",
        );
        text
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{Tier, TierCounts};

    #[derive(Debug, Default)]
    struct MockSender {
        fail_for: Vec<String>,
        sent: RefCell<Vec<(String, String)>>,
        edited: RefCell<Vec<(String, String, String)>>,
        next_ref: Cell<u64>,
    }

    impl MockSender {
        fn failing_for(destinations: &[&str]) -> Self {
            Self {
                fail_for: destinations.iter().map(|d| d.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl MessageSender for MockSender {
        fn send(&self, destination_id: &str, text: &str) -> Result<String, WatchError> {
            if self.fail_for.iter().any(|d| d == destination_id) {
                return Err(WatchError::Delivery {
                    destination_id: destination_id.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            self.sent
                .borrow_mut()
                .push((destination_id.to_string(), text.to_string()));
            let reference = self.next_ref.get() + 1;
            self.next_ref.set(reference);
            Ok(format!("msg-{reference}"))
        }

        fn edit(
            &self,
            destination_id: &str,
            message_ref: &str,
            text: &str,
        ) -> Result<String, WatchError> {
            if self.fail_for.iter().any(|d| d == destination_id) {
                return Err(WatchError::Delivery {
                    destination_id: destination_id.to_string(),
                    reason: "message gone".to_string(),
                });
            }
            self.edited.borrow_mut().push((
                destination_id.to_string(),
                message_ref.to_string(),
                text.to_string(),
            ));
            Ok(message_ref.to_string())
        }
    }

    fn payout() -> Payout {
        let mut tier_rewards = BTreeMap::new();
        tier_rewards.insert(Tier::T1, 151.0);
        tier_rewards.insert(Tier::T2, 182.5);
        tier_rewards.insert(Tier::T3, 762.5);
        tier_rewards.insert(Tier::T4, 2_910.0);
        Payout {
            minted: 11_400.0,
            fees: 200.0,
            total: 11_600.0,
            duration_label: "20:00".to_string(),
            observed_at_unix_ms: 1_786_019_405_000,
            tier_rewards,
            tier_counts: TierCounts::new(10.0, 8.0, 4.0, 2.0),
            hosting_fee_coin: 0.0,
            hosting_fee_usd: 0.0,
            price_usd: 0.0,
            block_number: Some(1_234_567),
            alert: None,
        }
    }

    fn targets(ids: &[&str]) -> BTreeMap<String, String> {
        ids.iter()
            .map(|id| (id.to_string(), format!("label-{id}")))
            .collect()
    }

    #[test]
    fn one_failing_target_does_not_abort_the_fan_out() {
        let sender = MockSender::failing_for(&["ch-3"]);
        let dispatcher = AlertDispatcher::new(sender, 2000, None);
        let outcome = dispatcher.dispatch(&payout(), &targets(&["ch-1", "ch-2", "ch-3", "ch-4", "ch-5"]));

        assert_eq!(outcome.total_targets, 5);
        assert_eq!(outcome.success_count, 4);
        assert_eq!(outcome.fail_count, 1);
        assert_eq!(outcome.deliveries.len(), 5);

        let failed: Vec<&DeliveryRecord> = outcome
            .deliveries
            .iter()
            .filter(|record| !record.delivered)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].destination_id, "ch-3");
        assert!(failed[0].error_text.as_deref().is_some_and(|text| text.contains("connection reset")));
        assert!(failed[0].message_ref.is_none());

        for record in outcome.deliveries.iter().filter(|record| record.delivered) {
            assert!(record.message_ref.is_some());
            assert!(record.error_text.is_none());
        }
    }

    #[test]
    fn oversized_alerts_split_and_record_the_last_chunk_ref() {
        let sender = MockSender::default();
        // Far below the real platform limit to force splitting.
        let dispatcher = AlertDispatcher::new(sender, 120, None);
        let outcome = dispatcher.dispatch(&payout(), &targets(&["ch-1"]));

        assert_eq!(outcome.success_count, 1);
        let sent = dispatcher.sender.sent.borrow();
        assert!(sent.len() > 1, "expected chunked sends, got {}", sent.len());
        for (_, chunk) in sent.iter() {
            assert!(chunk.len() <= 120);
        }
        let last_ref = format!("msg-{}", sent.len());
        assert_eq!(
            outcome.deliveries[0].message_ref.as_deref(),
            Some(last_ref.as_str())
        );
    }

    #[test]
    fn alert_text_carries_summary_table_and_disclaimer() {
        let dispatcher = AlertDispatcher::new(
            MockSender::default(),
            2000,
            Some("https://explorer.example".to_string()),
        );
        let text = dispatcher.build_alert_text(&payout());
        assert!(text.starts_with("Delicious payout is served!"));
        assert!(text.contains("Minted : 11,400"));
        assert!(text.contains("Duration : 20:00"));
        assert!(text.contains("Tier 1"));
        assert!(text.contains("2,910"));
        assert!(text.contains("https://explorer.example/block/1234567"));
        assert!(text.contains("Disclaimer"));
        // No hosting fee line when the price feed was unavailable.
        assert!(!text.contains("Hosting Fee"));
    }

    #[test]
    fn update_edits_existing_messages_in_place() {
        let sender = MockSender::failing_for(&["ch-2"]);
        let dispatcher = AlertDispatcher::new(sender, 2000, None);
        let mut refs = BTreeMap::new();
        refs.insert("ch-1".to_string(), "msg-10".to_string());
        refs.insert("ch-2".to_string(), "msg-11".to_string());

        let outcome = dispatcher.update(&payout(), &refs);
        assert_eq!(outcome.total_targets, 2);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.fail_count, 1);

        let edited = dispatcher.sender.edited.borrow();
        assert_eq!(edited.len(), 1);
        assert_eq!(edited[0].0, "ch-1");
        assert_eq!(edited[0].1, "msg-10");
        // The failed edit keeps its old ref so a later retry can still
        // address the message.
        let failed = outcome
            .deliveries
            .iter()
            .find(|record| !record.delivered)
            .expect("failed record");
        assert_eq!(failed.message_ref.as_deref(), Some("msg-11"));
    }

    #[test]
    fn empty_target_set_produces_an_empty_outcome() {
        let dispatcher = AlertDispatcher::new(MockSender::default(), 2000, None);
        let outcome = dispatcher.dispatch(&payout(), &BTreeMap::new());
        assert_eq!(outcome.total_targets, 0);
        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.fail_count, 0);
        assert!(outcome.deliveries.is_empty());
    }
}
