//! Balance oracle client: `eth_call` lookups against the ledger gateway and
//! the TTL-with-stale-fallback cache for tier member counts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::OracleConfig;
use crate::error::WatchError;
use crate::types::{Tier, TierCounts, ALL_TIERS};

/// Read side of the ledger: pool balances and tier membership.
pub trait BalanceOracle {
    /// `(minted, fees)` accumulated in the current cycle. No retry, no
    /// cache; a transport or status failure is `OracleUnavailable`.
    fn pool_balances(&self) -> Result<(f64, f64), WatchError>;

    /// Active member count per tier, served through the tier-count cache.
    fn tier_counts(&self, now_unix_ms: i64) -> Result<TierCounts, WatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedTierCount {
    pub value: f64,
    pub updated_at_unix_ms: i64,
}

/// Where a tier count came from on one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierCountSource {
    FreshCache,
    Queried,
    StaleCache,
}

/// Per-tier read-through cache. A positive entry younger than the TTL is
/// served without a query; a failed query falls back to any positive entry
/// regardless of age; a failed query with nothing cached is a hard miss.
#[derive(Debug, Default)]
pub struct TierCountCache {
    ttl_ms: i64,
    entries: Mutex<BTreeMap<Tier, CachedTierCount>>,
}

impl TierCountCache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn lookup<F>(
        &self,
        tier: Tier,
        now_unix_ms: i64,
        query: F,
    ) -> Result<(f64, TierCountSource), WatchError>
    where
        F: FnOnce() -> Result<f64, WatchError>,
    {
        let cached = self.entry(tier);
        if let Some(entry) = cached {
            if entry.value > 0.0 && now_unix_ms - entry.updated_at_unix_ms < self.ttl_ms {
                return Ok((entry.value, TierCountSource::FreshCache));
            }
        }
        match query() {
            Ok(value) => {
                self.store(tier, value, now_unix_ms);
                Ok((value, TierCountSource::Queried))
            }
            Err(err) => match cached {
                Some(entry) if entry.value > 0.0 => {
                    eprintln!("[oracle] tier {tier} query failed, serving stale count: {err}");
                    Ok((entry.value, TierCountSource::StaleCache))
                }
                _ => Err(err),
            },
        }
    }

    fn entry(&self, tier: Tier) -> Option<CachedTierCount> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(&tier).copied()
    }

    fn store(&self, tier: Tier, value: f64, now_unix_ms: i64) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            tier,
            CachedTierCount {
                value,
                updated_at_unix_ms: now_unix_ms,
            },
        );
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: u64,
    method: &'a str,
    params: (RpcCall<'a>, &'a str),
}

#[derive(Debug, Serialize)]
struct RpcCall<'a> {
    to: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    message: String,
}

/// Blocking JSON-RPC client for the ledger gateway.
#[derive(Debug)]
pub struct LedgerRpcClient {
    rpc_url: String,
    reward_pool_contract: String,
    tier_contract: String,
    minted_selector: String,
    fees_selector: String,
    tier_selector_prefix: String,
    client: Client,
    cache: TierCountCache,
    next_request_id: AtomicU64,
}

impl LedgerRpcClient {
    pub fn from_config(config: &OracleConfig) -> Result<Self, WatchError> {
        if config.rpc_url.trim().is_empty() {
            return Err(WatchError::Config {
                reason: "oracle rpc_url is required".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| WatchError::Config {
                reason: format!("build oracle http client failed: {err}"),
            })?;
        Ok(Self {
            rpc_url: config.rpc_url.trim_end_matches('/').to_string(),
            reward_pool_contract: config.reward_pool_contract.clone(),
            tier_contract: config.tier_contract.clone(),
            minted_selector: config.minted_selector.clone(),
            fees_selector: config.fees_selector.clone(),
            tier_selector_prefix: config.tier_selector_prefix.clone(),
            client,
            cache: TierCountCache::new((config.tier_cache_ttl_minutes * 60_000.0) as i64),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Issues one `eth_call` and decodes the 32-byte result into a raw
    /// quantity.
    fn eth_call(&self, to: &str, data: &str) -> Result<f64, WatchError> {
        let payload = RpcRequest {
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: (RpcCall { to, data }, "latest"),
        };
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .map_err(|err| WatchError::OracleUnavailable {
                reason: format!("eth_call request failed: {err}"),
            })?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_else(|_| "<no body>".to_string());
            return Err(WatchError::OracleUnavailable {
                reason: format!("eth_call status {}: {body}", status.as_u16()),
            });
        }
        let response: RpcResponse =
            response
                .json()
                .map_err(|err| WatchError::OracleUnavailable {
                    reason: format!("decode eth_call response failed: {err}"),
                })?;
        if let Some(error) = response.error {
            return Err(WatchError::OracleUnavailable {
                reason: format!("eth_call error: {}", error.message),
            });
        }
        match response.result {
            Some(result) => decode_quantity(&result),
            None => Err(WatchError::OracleUnavailable {
                reason: "eth_call response carried no result".to_string(),
            }),
        }
    }

    fn query_tier(&self, tier: Tier) -> Result<f64, WatchError> {
        let data = format!("{}{}", self.tier_selector_prefix, tier.index());
        self.eth_call(&self.tier_contract, &data)
    }
}

impl BalanceOracle for LedgerRpcClient {
    fn pool_balances(&self) -> Result<(f64, f64), WatchError> {
        let minted = wei_to_coin(self.eth_call(&self.reward_pool_contract, &self.minted_selector)?);
        let fees = wei_to_coin(self.eth_call(&self.reward_pool_contract, &self.fees_selector)?);
        Ok((minted, fees))
    }

    fn tier_counts(&self, now_unix_ms: i64) -> Result<TierCounts, WatchError> {
        let mut counts = TierCounts::default();
        for tier in ALL_TIERS {
            let (value, _) = self
                .cache
                .lookup(tier, now_unix_ms, || self.query_tier(tier))?;
            counts.set(tier, value);
        }
        Ok(counts)
    }
}

/// Decodes a 0x-prefixed hex quantity into `f64`. Values wider than the
/// mantissa lose precision, which is acceptable for balance display and
/// threshold checks.
pub(crate) fn decode_quantity(result: &str) -> Result<f64, WatchError> {
    let trimmed = result.trim().trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    let bytes = if trimmed.len() % 2 == 1 {
        hex::decode(format!("0{trimmed}"))
    } else {
        hex::decode(trimmed)
    }
    .map_err(|err| WatchError::OracleUnavailable {
        reason: format!("decode eth_call quantity {result:?} failed: {err}"),
    })?;
    Ok(bytes
        .iter()
        .fold(0.0_f64, |acc, byte| acc * 256.0 + f64::from(*byte)))
}

fn wei_to_coin(raw: f64) -> f64 {
    raw / 1e18
}
