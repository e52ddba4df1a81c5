// src/clients/coingecko.rs
//! Price source over the CoinGecko simple-price endpoint.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::pipeline::{PriceQuote, PriceSource};

#[derive(Clone)]
pub struct CoinGeckoPrices {
    api_url: String,
    coin_id: String,
    client: Client,
    timeout: Duration,
}

impl CoinGeckoPrices {
    pub fn new(api_url: String, coin_id: String) -> Self {
        Self {
            api_url,
            coin_id,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct CoinPrice {
    usd: Option<f64>,
    rub: Option<f64>,
    usd_24h_change: Option<f64>,
    usd_24h_vol: Option<f64>,
}

#[async_trait::async_trait]
impl PriceSource for CoinGeckoPrices {
    async fn latest(&self) -> Result<Option<PriceQuote>> {
        let rsp = self
            .client
            .get(&self.api_url)
            .timeout(self.timeout)
            .query(&[
                ("ids", self.coin_id.as_str()),
                ("vs_currencies", "usd,rub"),
                ("include_24hr_change", "true"),
                ("include_24hr_vol", "true"),
            ])
            .send()
            .await
            .context("coingecko request")?;
        if !rsp.status().is_success() {
            anyhow::bail!("coingecko HTTP error: {}", rsp.status());
        }
        let body: HashMap<String, CoinPrice> =
            rsp.json().await.context("decoding coingecko response")?;
        let Some(p) = body.get(&self.coin_id) else {
            return Ok(None);
        };
        let quote = PriceQuote {
            usd: p.usd.unwrap_or(0.0),
            rub: p.rub.unwrap_or(0.0),
            change_24h: p.usd_24h_change.unwrap_or(0.0),
            volume_24h: p.usd_24h_vol.unwrap_or(0.0),
        };
        info!(target: "price", usd = quote.usd, change_24h = quote.change_24h, "quote fetched");
        Ok(Some(quote))
    }
}
