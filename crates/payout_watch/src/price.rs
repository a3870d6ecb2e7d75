//! Coin price lookup for the hosting-fee estimate. Optional: a missing or
//! failing feed zeroes the fee fields, it never blocks an alert.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::PriceConfig;
use crate::error::WatchError;

pub trait PriceFeed {
    fn latest_price_usd(&self) -> Result<f64, WatchError>;
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(alias = "lastPriceUSD")]
    last_price_usd: f64,
}

#[derive(Debug)]
pub struct TickerHttpClient {
    url: String,
    client: Client,
}

impl TickerHttpClient {
    pub fn from_config(config: &PriceConfig) -> Result<Option<Self>, WatchError> {
        let url = match &config.ticker_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => return Ok(None),
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| WatchError::Config {
                reason: format!("build ticker http client failed: {err}"),
            })?;
        Ok(Some(Self { url, client }))
    }
}

impl PriceFeed for TickerHttpClient {
    fn latest_price_usd(&self) -> Result<f64, WatchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|err| WatchError::OracleUnavailable {
                reason: format!("ticker request failed: {err}"),
            })?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(WatchError::OracleUnavailable {
                reason: format!("ticker status {}", status.as_u16()),
            });
        }
        let ticker: TickerResponse =
            response
                .json()
                .map_err(|err| WatchError::OracleUnavailable {
                    reason: format!("decode ticker response failed: {err}"),
                })?;
        Ok(ticker.last_price_usd)
    }
}
