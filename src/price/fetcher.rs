use crate::error::Result;
use crate::models::{HistoryResponse, PriceHistory, SpotPriceResponse};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_spot_price(&self) -> Result<Decimal>;
    async fn fetch_history(&self) -> Result<PriceHistory>;
}

/// Pulls prices over HTTP. Every request is bounded by the client timeout;
/// a timeout surfaces as an ordinary `Http` error.
pub struct HttpPriceSource {
    client: reqwest::Client,
    spot_url: String,
    history_url: String,
}

impl HttpPriceSource {
    pub fn new(spot_url: String, history_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            spot_url,
            history_url,
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_spot_price(&self) -> Result<Decimal> {
        debug!(url = %self.spot_url, "Fetching spot price");

        let response: SpotPriceResponse = self
            .client
            .get(&self.spot_url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.data.price_usd)
    }

    async fn fetch_history(&self) -> Result<PriceHistory> {
        debug!(url = %self.history_url, "Fetching price history");

        let response: HistoryResponse = self
            .client
            .get(&self.history_url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.into())
    }
}
