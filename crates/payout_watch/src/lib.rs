pub mod config;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod format;
pub mod oracle;
pub mod price;
pub mod reward;
pub mod store;
pub mod types;
pub mod watcher;

pub use config::{
    AlertConfig, DetectorConfig, OracleConfig, PriceConfig, ScheduleConfig, StoreConfig,
    TierSharesConfig, WatchConfig, DEFAULT_CONFIG_FILE_NAME, DEFAULT_COOLDOWN_MINUTES,
    DEFAULT_MESSAGE_LIMIT, DEFAULT_MIN_ACCUMULATION_HOURS, DEFAULT_POLL_INTERVAL_SECONDS,
    DEFAULT_TIER_CACHE_TTL_MINUTES, ENV_CONFIRMATIONS_FILE, ENV_GATEWAY_RPC_URL, ENV_STATE_DIR,
    ENV_TICKER_URL,
};
pub use detector::{DetectorRule, DetectorState, PollDecision};
pub use dispatch::{AlertDispatcher, MessageSender};
pub use error::WatchError;
pub use feed::FileConfirmationFeed;
pub use format::{fill_or_limit, format_num, format_ts, split_for_limit, DASH_LINE};
pub use oracle::{BalanceOracle, CachedTierCount, LedgerRpcClient, TierCountCache, TierCountSource};
pub use price::{PriceFeed, TickerHttpClient};
pub use reward::{estimate_hosting_fee, RewardBreakdown, RewardSchedule, TierShare};
pub use store::WatchStateStore;
pub use types::{
    AlertOutcome, ConfirmationRecord, DeliveryRecord, Payout, RewardPoolSnapshot, Tier,
    TierCounts, ALL_TIERS,
};
pub use watcher::{PayoutWatcher, TickReport};
