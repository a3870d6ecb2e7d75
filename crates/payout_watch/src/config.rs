//! Watch configuration: `config.toml` when present, environment fallbacks
//! for deployment-specific values, defaults for everything else.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::WatchError;
use crate::reward::{RewardSchedule, TierShare};
use crate::types::Tier;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_GATEWAY_RPC_URL: &str = "PAYOUT_WATCH_GATEWAY_RPC_URL";
pub const ENV_TICKER_URL: &str = "PAYOUT_WATCH_TICKER_URL";
pub const ENV_STATE_DIR: &str = "PAYOUT_WATCH_STATE_DIR";
pub const ENV_CONFIRMATIONS_FILE: &str = "PAYOUT_WATCH_CONFIRMATIONS_FILE";

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 120;
pub const DEFAULT_TIER_CACHE_TTL_MINUTES: f64 = 15.0;
pub const DEFAULT_COOLDOWN_MINUTES: f64 = 480.0;
pub const DEFAULT_MIN_ACCUMULATION_HOURS: f64 = 8.0;
pub const DEFAULT_MESSAGE_LIMIT: usize = 2000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// JSON-RPC gateway endpoint of the ledger.
    pub rpc_url: String,
    /// Contract holding the minted pool and service fee balances.
    pub reward_pool_contract: String,
    /// Contract answering per-tier member counts.
    pub tier_contract: String,
    pub minted_selector: String,
    pub fees_selector: String,
    /// Call data prefix; the tier number is appended as the final nibble.
    pub tier_selector_prefix: String,
    pub timeout_ms: u64,
    pub tier_cache_ttl_minutes: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            reward_pool_contract: String::new(),
            tier_contract: String::new(),
            minted_selector: "0x405187f4".to_string(),
            fees_selector: "0xbc3cde60".to_string(),
            tier_selector_prefix:
                "0x993ed2a5000000000000000000000000000000000000000000000000000000000000000"
                    .to_string(),
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            tier_cache_ttl_minutes: DEFAULT_TIER_CACHE_TTL_MINUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub block_reward: f64,
    pub block_cycle_minutes: f64,
    pub tiers: TierSharesConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            block_reward: 38.0,
            block_cycle_minutes: 4.0,
            tiers: TierSharesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierSharesConfig {
    pub t1: TierShare,
    pub t2: TierShare,
    pub t3: TierShare,
    pub t4: TierShare,
}

impl Default for TierSharesConfig {
    fn default() -> Self {
        Self {
            t1: TierShare {
                minted_per_block: 5.0,
                fees_fraction: 0.05,
            },
            t2: TierShare {
                minted_per_block: 8.0,
                fees_fraction: 0.10,
            },
            t3: TierShare {
                minted_per_block: 10.0,
                fees_fraction: 0.25,
            },
            t4: TierShare {
                minted_per_block: 15.0,
                fees_fraction: 0.60,
            },
        }
    }
}

impl TierSharesConfig {
    pub fn get(&self, tier: Tier) -> TierShare {
        match tier {
            Tier::T1 => self.t1,
            Tier::T2 => self.t2,
            Tier::T3 => self.t3,
            Tier::T4 => self.t4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub poll_interval_seconds: u64,
    pub cooldown_minutes: f64,
    pub min_accumulation_hours: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            min_accumulation_hours: DEFAULT_MIN_ACCUMULATION_HOURS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Platform message length limit; oversized alerts split on line breaks.
    pub message_limit: usize,
    /// Explorer base URL for block links in alerts.
    pub explorer_homepage: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            explorer_homepage: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Ticker endpoint for the coin's USD price; hosting fee estimation is
    /// skipped when unset.
    pub ticker_url: Option<String>,
    pub hosting_fee_usd_per_month: f64,
    pub timeout_ms: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            ticker_url: None,
            hosting_fee_usd_per_month: 10.0,
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub state_dir: String,
    /// Feed file written by the external settlement receiver, if deployed.
    pub confirmations_file: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: "payout-watch-state".to_string(),
            confirmations_file: None,
        }
    }
}

impl WatchConfig {
    pub fn from_default_sources() -> Result<Self, WatchError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::from_file(config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, WatchError> {
        let content = std::fs::read_to_string(path).map_err(|err| WatchError::Config {
            reason: format!("read config file {} failed: {err}", path.display()),
        })?;
        toml::from_str(&content).map_err(|err| WatchError::Config {
            reason: format!("parse config file {} failed: {err}", path.display()),
        })
    }

    pub fn apply_env_overrides<F>(&mut self, mut getter: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(url) = non_empty(getter(ENV_GATEWAY_RPC_URL)) {
            self.oracle.rpc_url = url;
        }
        if let Some(url) = non_empty(getter(ENV_TICKER_URL)) {
            self.price.ticker_url = Some(url);
        }
        if let Some(dir) = non_empty(getter(ENV_STATE_DIR)) {
            self.store.state_dir = dir;
        }
        if let Some(path) = non_empty(getter(ENV_CONFIRMATIONS_FILE)) {
            self.store.confirmations_file = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), WatchError> {
        if self.schedule.block_reward <= 0.0 {
            return Err(WatchError::Config {
                reason: "schedule block_reward must be > 0".to_string(),
            });
        }
        if self.schedule.block_cycle_minutes <= 0.0 {
            return Err(WatchError::Config {
                reason: "schedule block_cycle_minutes must be > 0".to_string(),
            });
        }
        if self.detector.poll_interval_seconds == 0 {
            return Err(WatchError::Config {
                reason: "detector poll_interval_seconds must be >= 1".to_string(),
            });
        }
        if self.detector.min_accumulation_hours <= 0.0 {
            return Err(WatchError::Config {
                reason: "detector min_accumulation_hours must be > 0".to_string(),
            });
        }
        if self.detector.cooldown_minutes < 0.0 {
            return Err(WatchError::Config {
                reason: "detector cooldown_minutes must be >= 0".to_string(),
            });
        }
        if self.oracle.timeout_ms == 0 {
            return Err(WatchError::Config {
                reason: "oracle timeout_ms must be >= 1".to_string(),
            });
        }
        if self.oracle.tier_cache_ttl_minutes < 0.0 {
            return Err(WatchError::Config {
                reason: "oracle tier_cache_ttl_minutes must be >= 0".to_string(),
            });
        }
        if self.alert.message_limit < 64 {
            return Err(WatchError::Config {
                reason: "alert message_limit must be >= 64".to_string(),
            });
        }
        for tier in crate::types::ALL_TIERS {
            let share = self.schedule.tiers.get(tier);
            if share.minted_per_block < 0.0 || share.fees_fraction < 0.0 {
                return Err(WatchError::Config {
                    reason: format!("schedule tier {tier} shares must be >= 0"),
                });
            }
        }
        Ok(())
    }

    pub fn reward_schedule(&self) -> RewardSchedule {
        let mut shares = BTreeMap::new();
        for tier in crate::types::ALL_TIERS {
            shares.insert(tier, self.schedule.tiers.get(tier));
        }
        RewardSchedule {
            block_reward: self.schedule.block_reward,
            block_cycle_minutes: self.schedule.block_cycle_minutes,
            shares,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
