use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchError {
    Config { reason: String },
    OracleUnavailable { reason: String },
    Trigger { reason: String },
    Delivery { destination_id: String, reason: String },
    Persistence { reason: String },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::Config { reason } => write!(f, "invalid watch config: {reason}"),
            WatchError::OracleUnavailable { reason } => {
                write!(f, "balance oracle unavailable: {reason}")
            }
            WatchError::Trigger { reason } => write!(f, "manual trigger rejected: {reason}"),
            WatchError::Delivery {
                destination_id,
                reason,
            } => write!(f, "delivery to {destination_id} failed: {reason}"),
            WatchError::Persistence { reason } => write!(f, "state persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for WatchError {}
