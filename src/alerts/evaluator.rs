use crate::error::{Result, WatcherError};
use crate::models::{NotificationRecord, Threshold, Watcher, WatcherField, WatcherFilter};
use crate::notify::NotificationDispatcher;
use crate::price::PriceCache;
use crate::watcher::WatcherRepository;
use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Number, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ALERT_TITLE: &str = "Price Alert";
pub const ALERT_TYPE: &str = "price-alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Price change between a watcher's baseline and the current spot price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMovement {
    pub current_price: Decimal,
    /// Unrounded, signed.
    pub percentage: Decimal,
    /// `|percentage|` rounded to 2 dp, for display.
    pub rounded_percentage: Decimal,
    /// Current price with exactly 5 decimals.
    pub rounded_price: String,
}

impl PriceMovement {
    pub fn between(baseline: Option<Decimal>, current_price: Decimal) -> Result<Self> {
        let baseline = baseline
            .ok_or_else(|| WatcherError::MissingBaseline("watcher has no baseline price".into()))?;
        if baseline.is_zero() {
            return Err(WatcherError::MissingBaseline("baseline price is zero".into()));
        }

        let percentage = current_price
            .checked_sub(baseline)
            .and_then(|delta| delta.checked_div(baseline))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| {
                WatcherError::PriceOutOfRange(format!(
                    "change from {} to {} overflows",
                    baseline, current_price
                ))
            })?;
        let rounded_percentage = percentage
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .abs()
            .normalize();
        let rounded_price = format!(
            "{:.5}",
            current_price.round_dp_with_strategy(5, RoundingStrategy::MidpointAwayFromZero)
        );

        Ok(Self {
            current_price,
            percentage,
            rounded_percentage,
            rounded_price,
        })
    }

    /// The trigger test runs on the signed value; rounding is display only.
    pub fn direction(&self, threshold: Threshold) -> Option<Direction> {
        let limit = threshold.percent();
        if self.percentage >= limit {
            Some(Direction::Up)
        } else if self.percentage <= -limit {
            Some(Direction::Down)
        } else {
            None
        }
    }

    pub fn alert_body(&self, direction: Direction, symbol: &str) -> String {
        match direction {
            Direction::Up => format!(
                "🚀 {} Price changed on +{}%! Current price ${}",
                symbol, self.rounded_percentage, self.rounded_price
            ),
            Direction::Down => format!(
                "🔻 {} Price changed on -{}%! Current price ${}",
                symbol, self.rounded_percentage, self.rounded_price
            ),
        }
    }

    pub fn alert_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("type".to_string(), json!(ALERT_TYPE));
        data.insert("percentage".to_string(), self.percentage_value());
        data
    }

    /// Whole percentages go out as integers so `6` flattens to "6", not "6.0".
    fn percentage_value(&self) -> Value {
        let number = if self.rounded_percentage.scale() == 0 {
            self.rounded_percentage.to_i64().map(Number::from)
        } else {
            self.rounded_percentage.to_f64().and_then(Number::from_f64)
        };
        number.map_or(Value::Null, Value::Number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub movement: PriceMovement,
    pub direction: Option<Direction>,
    /// `None` when no alert fired; otherwise whether the push went out.
    pub delivered: Option<bool>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub evaluated: usize,
    pub alerted: usize,
    pub delivery_failures: usize,
    pub failures: Vec<(String, WatcherError)>,
}

/// Evaluates every price-alert watcher against the cached spot price.
pub struct AlertEngine {
    cache: Arc<dyn PriceCache>,
    repository: Arc<dyn WatcherRepository>,
    dispatcher: NotificationDispatcher,
    token_symbol: String,
}

impl AlertEngine {
    pub fn new(
        cache: Arc<dyn PriceCache>,
        repository: Arc<dyn WatcherRepository>,
        dispatcher: NotificationDispatcher,
        token_symbol: String,
    ) -> Self {
        Self {
            cache,
            repository,
            dispatcher,
            token_symbol,
        }
    }

    /// One tick over all watchers with price alerts on.
    ///
    /// Each page is fanned out concurrently and fully joined; a failing
    /// watcher is recorded in the report and never cancels its siblings.
    pub async fn tick(&self) -> Result<TickReport> {
        let filter = WatcherFilter::price_alerts_enabled();
        let mut report = TickReport::default();
        let mut page = 1;

        loop {
            let watchers = self.repository.list(&filter, page).await?;
            if watchers.is_empty() {
                break;
            }

            let results = join_all(watchers.iter().map(|watcher| self.evaluate(watcher))).await;

            for (watcher, result) in watchers.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        report.evaluated += 1;
                        if outcome.direction.is_some() {
                            report.alerted += 1;
                        }
                        if outcome.delivered == Some(false) {
                            report.delivery_failures += 1;
                        }
                    }
                    Err(e) => {
                        warn!(push_token = %watcher.push_token, error = %e, "Watcher evaluation failed");
                        report.failures.push((watcher.push_token.to_string(), e));
                    }
                }
            }

            page += 1;
        }

        Ok(report)
    }

    /// Evaluate one watcher and roll its baseline forward.
    ///
    /// The baseline write happens whether or not an alert fired or was
    /// delivered, so alerts measure movement since the previous tick. It is
    /// skipped only when there was nothing to measure against.
    pub async fn evaluate(&self, watcher: &Watcher) -> Result<EvaluationOutcome> {
        let current = self
            .cache
            .spot_price()
            .await?
            .ok_or_else(|| WatcherError::MissingBaseline("price data not found".into()))?;

        let movement = PriceMovement::between(watcher.token_price, current.price)?;
        let direction = movement.direction(watcher.threshold);

        let delivered = match direction {
            Some(direction) => Some(self.notify(watcher, &movement, direction).await),
            None => None,
        };

        let updated = self
            .repository
            .update_field(
                watcher.push_token.as_str(),
                WatcherField::TokenPrice(movement.current_price),
            )
            .await?;
        if !updated {
            return Err(WatcherError::NotFound(format!(
                "watcher {} removed during tick",
                watcher.push_token
            )));
        }

        debug!(
            push_token = %watcher.push_token,
            percentage = %movement.percentage,
            alerted = direction.is_some(),
            "Baseline advanced"
        );

        Ok(EvaluationOutcome {
            movement,
            direction,
            delivered,
        })
    }

    async fn notify(&self, watcher: &Watcher, movement: &PriceMovement, direction: Direction) -> bool {
        let body = movement.alert_body(direction, &self.token_symbol);

        let sent = match self
            .dispatcher
            .send(ALERT_TITLE, &body, &watcher.push_token, movement.alert_data())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(push_token = %watcher.push_token, error = %e, "Price alert not delivered");
                false
            }
        };

        let record = NotificationRecord {
            title: ALERT_TITLE.to_string(),
            body,
            sent,
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .repository
            .record_notification(watcher.push_token.as_str(), &record)
            .await
        {
            warn!(push_token = %watcher.push_token, error = %e, "Failed to record notification");
        }

        sent
    }
}

pub async fn run_alert_loop(engine: Arc<AlertEngine>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Alert evaluation stopped");
                return;
            }
            _ = interval.tick() => {
                match engine.tick().await {
                    Ok(report) => info!(
                        evaluated = report.evaluated,
                        alerted = report.alerted,
                        delivery_failures = report.delivery_failures,
                        failed = report.failures.len(),
                        "Alert tick complete"
                    ),
                    Err(e) => warn!(error = %e, "Alert tick aborted while listing watchers"),
                }
            }
        }
    }
}
