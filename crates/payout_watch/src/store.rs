//! Durable watch state: last payout, append-only payout history, and the
//! alert subscription registry. One owning task writes; every document is
//! rewritten atomically via a temp file and rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WatchError;
use crate::types::Payout;

const LAST_PAYOUT_FILE_NAME: &str = "last_payout.json";
const PAYOUT_LOG_FILE_NAME: &str = "payout_log.json";
const SUBSCRIPTIONS_FILE_NAME: &str = "subscriptions.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStateStore {
    dir: PathBuf,
}

impl WatchStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load_last_payout(&self) -> Result<Option<Payout>, WatchError> {
        read_json_opt(&self.dir.join(LAST_PAYOUT_FILE_NAME))
    }

    pub fn save_last_payout(&self, payout: &Payout) -> Result<(), WatchError> {
        write_json_atomic(payout, &self.dir.join(LAST_PAYOUT_FILE_NAME))
    }

    /// Appends one payout to the historical log. The log is audit history:
    /// entries are never rewritten or dropped.
    pub fn append_payout_log(&self, payout: &Payout) -> Result<(), WatchError> {
        let path = self.dir.join(PAYOUT_LOG_FILE_NAME);
        let mut log: Vec<Payout> = read_json_opt(&path)?.unwrap_or_default();
        log.push(payout.clone());
        write_json_atomic(&log, &path)
    }

    pub fn load_payout_log(&self) -> Result<Vec<Payout>, WatchError> {
        Ok(read_json_opt(&self.dir.join(PAYOUT_LOG_FILE_NAME))?.unwrap_or_default())
    }

    /// Subscribed alert destinations: destination id to display label.
    pub fn load_subscriptions(&self) -> Result<BTreeMap<String, String>, WatchError> {
        Ok(read_json_opt(&self.dir.join(SUBSCRIPTIONS_FILE_NAME))?.unwrap_or_default())
    }

    pub fn set_subscription(&self, destination_id: &str, label: &str) -> Result<(), WatchError> {
        let mut subscriptions = self.load_subscriptions()?;
        subscriptions.insert(destination_id.to_string(), label.to_string());
        write_json_atomic(&subscriptions, &self.dir.join(SUBSCRIPTIONS_FILE_NAME))
    }

    pub fn remove_subscription(&self, destination_id: &str) -> Result<bool, WatchError> {
        let mut subscriptions = self.load_subscriptions()?;
        let removed = subscriptions.remove(destination_id).is_some();
        if removed {
            write_json_atomic(&subscriptions, &self.dir.join(SUBSCRIPTIONS_FILE_NAME))?;
        }
        Ok(removed)
    }
}

pub(crate) fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, WatchError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(WatchError::Persistence {
                reason: format!("read {} failed: {err}", path.display()),
            });
        }
    };
    let value = serde_json::from_slice::<T>(&bytes).map_err(|err| WatchError::Persistence {
        reason: format!("parse {} failed: {err}", path.display()),
    })?;
    Ok(Some(value))
}

pub(crate) fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<(), WatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| WatchError::Persistence {
            reason: format!("create state dir {} failed: {err}", parent.display()),
        })?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| WatchError::Persistence {
        reason: format!("serialize {} failed: {err}", path.display()),
    })?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, bytes).map_err(|err| WatchError::Persistence {
        reason: format!("write temp {} failed: {err}", temp_path.display()),
    })?;
    fs::rename(&temp_path, path).map_err(|err| WatchError::Persistence {
        reason: format!(
            "rename {} -> {} failed: {err}",
            temp_path.display(),
            path.display()
        ),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::types::{AlertOutcome, DeliveryRecord, Tier, TierCounts};

    fn temp_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("duration")
            .as_nanos();
        std::env::temp_dir().join(format!("payout-watch-store-{prefix}-{unique}"))
    }

    fn payout(observed_at_unix_ms: i64) -> Payout {
        let mut tier_rewards = BTreeMap::new();
        tier_rewards.insert(Tier::T1, 151.0);
        Payout {
            minted: 11_400.0,
            fees: 200.0,
            total: 11_600.0,
            duration_label: "20:00".to_string(),
            observed_at_unix_ms,
            tier_rewards,
            tier_counts: TierCounts::new(10.0, 8.0, 4.0, 2.0),
            hosting_fee_coin: 0.0,
            hosting_fee_usd: 0.0,
            price_usd: 0.0,
            block_number: Some(99),
            alert: Some(AlertOutcome {
                total_targets: 1,
                success_count: 0,
                fail_count: 1,
                deliveries: vec![DeliveryRecord {
                    destination_id: "ch-1".to_string(),
                    delivered: false,
                    error_text: Some("timeout".to_string()),
                    message_ref: None,
                }],
            }),
        }
    }

    #[test]
    fn last_payout_round_trips_with_alert_outcome() {
        let dir = temp_dir("round-trip");
        let store = WatchStateStore::open(&dir);
        assert_eq!(store.load_last_payout().expect("empty load"), None);

        let saved = payout(5_000);
        store.save_last_payout(&saved).expect("save");
        let loaded = store.load_last_payout().expect("load").expect("present");
        assert_eq!(loaded, saved);
        // Failed deliveries survive persistence; the failure record matters
        // as much as a success for audit.
        let alert = loaded.alert.expect("alert");
        assert_eq!(alert.fail_count, 1);
        assert_eq!(alert.deliveries[0].error_text.as_deref(), Some("timeout"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_replaces_the_previous_snapshot_whole() {
        let dir = temp_dir("replace");
        let store = WatchStateStore::open(&dir);
        store.save_last_payout(&payout(1_000)).expect("first save");
        store.save_last_payout(&payout(2_000)).expect("second save");
        let loaded = store.load_last_payout().expect("load").expect("present");
        assert_eq!(loaded.observed_at_unix_ms, 2_000);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn payout_log_appends_and_never_truncates() {
        let dir = temp_dir("log");
        let store = WatchStateStore::open(&dir);
        assert!(store.load_payout_log().expect("empty log").is_empty());

        store.append_payout_log(&payout(1_000)).expect("append 1");
        store.append_payout_log(&payout(2_000)).expect("append 2");
        store.append_payout_log(&payout(3_000)).expect("append 3");

        let log = store.load_payout_log().expect("load log");
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].observed_at_unix_ms, 1_000);
        assert_eq!(log[2].observed_at_unix_ms, 3_000);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn subscriptions_add_remove_round_trip() {
        let dir = temp_dir("subs");
        let store = WatchStateStore::open(&dir);
        assert!(store.load_subscriptions().expect("empty").is_empty());

        store
            .set_subscription("ch-1", "ops-room")
            .expect("subscribe 1");
        store
            .set_subscription("ch-2", "announcements")
            .expect("subscribe 2");
        let subscriptions = store.load_subscriptions().expect("load");
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(subscriptions.get("ch-1").map(String::as_str), Some("ops-room"));

        assert!(store.remove_subscription("ch-1").expect("remove"));
        assert!(!store.remove_subscription("ch-1").expect("remove again"));
        assert_eq!(store.load_subscriptions().expect("reload").len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_document_surfaces_a_persistence_error() {
        let dir = temp_dir("corrupt");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(LAST_PAYOUT_FILE_NAME), b"not json").expect("write garbage");
        let store = WatchStateStore::open(&dir);
        let err = store.load_last_payout().expect_err("corrupt load");
        match err {
            WatchError::Persistence { reason } => assert!(reason.contains("parse")),
            other => panic!("unexpected error: {other:?}"),
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
