use super::{PriceCache, PriceSource};
use crate::error::{Result, WatcherError};
use crate::models::{PriceHistory, PriceSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fetch the spot price and overwrite the cached key.
///
/// On any failure the cache is left untouched and the error comes back as
/// `StaleData`.
pub async fn refresh_spot_price(
    source: &dyn PriceSource,
    cache: &dyn PriceCache,
) -> Result<PriceSnapshot> {
    let price = source
        .fetch_spot_price()
        .await
        .map_err(|e| WatcherError::StaleData(format!("spot price fetch failed: {}", e)))?;

    let snapshot = PriceSnapshot::now(price);
    cache
        .store_spot_price(&snapshot)
        .await
        .map_err(|e| WatcherError::StaleData(format!("spot price write failed: {}", e)))?;

    Ok(snapshot)
}

/// Fetch the history window and replace the cached blob wholesale.
pub async fn refresh_history(
    source: &dyn PriceSource,
    cache: &dyn PriceCache,
) -> Result<PriceHistory> {
    let history = source
        .fetch_history()
        .await
        .map_err(|e| WatcherError::StaleData(format!("price history fetch failed: {}", e)))?;

    cache
        .store_history(&history)
        .await
        .map_err(|e| WatcherError::StaleData(format!("price history write failed: {}", e)))?;

    Ok(history)
}

pub async fn run_spot_refresh(
    source: Arc<dyn PriceSource>,
    cache: Arc<dyn PriceCache>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Spot price refresh stopped");
                return;
            }
            _ = interval.tick() => {
                match refresh_spot_price(source.as_ref(), cache.as_ref()).await {
                    Ok(snapshot) => info!(price = %snapshot.price, "Spot price cached"),
                    Err(e) => warn!(error = %e, "Keeping previous spot price"),
                }
            }
        }
    }
}

pub async fn run_history_refresh(
    source: Arc<dyn PriceSource>,
    cache: Arc<dyn PriceCache>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Price history refresh stopped");
                return;
            }
            _ = interval.tick() => {
                match refresh_history(source.as_ref(), cache.as_ref()).await {
                    Ok(history) => info!(points = history.points().len(), "Price history cached"),
                    Err(e) => warn!(error = %e, "Keeping previous price history"),
                }
            }
        }
    }
}
