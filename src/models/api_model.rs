use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// PRICE SOURCES
// ==========================================

/// Spot price endpoint: `{ "data": { "PriceUSD": 0.0123 } }`
#[derive(Debug, Deserialize)]
pub struct SpotPriceResponse {
    pub data: SpotPriceData,
}

#[derive(Debug, Deserialize)]
pub struct SpotPriceData {
    #[serde(rename = "PriceUSD", alias = "price_usd")]
    pub price_usd: Decimal,
}

/// History endpoint: `{ "prices": [[1700000000000, 0.0123], ...] }`
#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub prices: Vec<PricePoint>,
}

/// One `(timestamp_ms, price)` pair; serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint(pub i64, pub Decimal);

impl PricePoint {
    pub fn timestamp_ms(&self) -> i64 {
        self.0
    }
}

// ==========================================
// CACHE VALUES
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn now(price: Decimal) -> Self {
        Self {
            price,
            observed_at: Utc::now(),
        }
    }
}

/// Rolling window of prices, oldest first. Replaced wholesale on refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceHistory(pub Vec<PricePoint>);

impl PriceHistory {
    pub fn points(&self) -> &[PricePoint] {
        &self.0
    }
}

impl From<HistoryResponse> for PriceHistory {
    fn from(response: HistoryResponse) -> Self {
        let mut points = response.prices;
        points.sort_by_key(PricePoint::timestamp_ms);
        PriceHistory(points)
    }
}

// ==========================================
// EXPLORER WATCH SERVICE
// ==========================================

/// Body of a POST to the explorer's `/watch` endpoint.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WatchAction<'a> {
    Init { id: &'a str, url: &'a str },
    Subscribe { id: &'a str, addresses: &'a [String] },
    Unsubscribe { id: &'a str, addresses: &'a [String] },
    Check { id: &'a str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spot_price_parses_both_spellings() {
        let upper: SpotPriceResponse =
            serde_json::from_value(json!({"data": {"PriceUSD": 0.01234}})).unwrap();
        let lower: SpotPriceResponse =
            serde_json::from_value(json!({"data": {"price_usd": "0.01234"}})).unwrap();
        assert_eq!(upper.data.price_usd, lower.data.price_usd);
        assert_eq!(upper.data.price_usd.to_string(), "0.01234");
    }

    #[test]
    fn test_history_sorted_oldest_first() {
        let response: HistoryResponse = serde_json::from_value(json!({
            "prices": [[1700000600000i64, 0.2], [1700000000000i64, 0.1]]
        }))
        .unwrap();
        let history = PriceHistory::from(response);
        assert_eq!(history.points()[0].timestamp_ms(), 1700000000000);
        assert_eq!(history.points()[1].timestamp_ms(), 1700000600000);
    }

    #[test]
    fn test_watch_action_shape() {
        let addresses = vec!["0xabc".to_string()];
        let body = serde_json::to_value(WatchAction::Subscribe {
            id: "explorer-id",
            addresses: &addresses,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"action": "subscribe", "id": "explorer-id", "addresses": ["0xabc"]})
        );

        let check = serde_json::to_value(WatchAction::Check { id: "explorer-id" }).unwrap();
        assert_eq!(check, json!({"action": "check", "id": "explorer-id"}));
    }
}
