//! Confirmation feed: settlement transactions observed by an external
//! receiver process and handed over through a shared JSON file. Supplies the
//! authoritative block reference for a payout and the processed flag that
//! keeps a restarted watcher from re-alerting a handled cycle.

use std::path::PathBuf;

use crate::error::WatchError;
use crate::store::{read_json_opt, write_json_atomic};
use crate::types::ConfirmationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfirmationFeed {
    path: PathBuf,
}

impl FileConfirmationFeed {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<ConfirmationRecord>, WatchError> {
        Ok(read_json_opt(&self.path)?.unwrap_or_default())
    }

    /// The most recent confirmation, processed or not. `None` when the
    /// receiver has not written anything yet.
    pub fn latest(&self) -> Result<Option<ConfirmationRecord>, WatchError> {
        Ok(self.load()?.into_iter().last())
    }

    pub fn is_processed(&self, confirmation_id: &str) -> Result<bool, WatchError> {
        Ok(self
            .load()?
            .iter()
            .any(|record| record.confirmation_id == confirmation_id && record.processed))
    }

    /// Flags one confirmation as consumed. Idempotent: marking a record that
    /// is already processed is a no-op; the at-most-once guarantee lives in
    /// the `is_processed` check before dispatch.
    pub fn mark_processed(&self, confirmation_id: &str) -> Result<(), WatchError> {
        let mut records = self.load()?;
        let record = records
            .iter_mut()
            .find(|record| record.confirmation_id == confirmation_id)
            .ok_or_else(|| WatchError::Persistence {
                reason: format!(
                    "confirmation {confirmation_id} not present in {}",
                    self.path.display()
                ),
            })?;
        if record.processed {
            return Ok(());
        }
        record.processed = true;
        write_json_atomic(&records, &self.path)
    }
}
