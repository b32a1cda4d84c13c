use crate::error::{Result, WatcherError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::collections::BTreeSet;
use std::fmt;

// ==========================================
// 1. DOMAIN TYPES
// ==========================================

/// Percent move required before a price alert fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Threshold {
    #[default]
    Five,
    Eight,
    Ten,
}

impl Threshold {
    pub fn percent(self) -> Decimal {
        Decimal::from(i64::from(self))
    }
}

impl TryFrom<i64> for Threshold {
    type Error = WatcherError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            5 => Ok(Threshold::Five),
            8 => Ok(Threshold::Eight),
            10 => Ok(Threshold::Ten),
            other => Err(WatcherError::InvalidThreshold(other)),
        }
    }
}

impl From<Threshold> for i64 {
    fn from(threshold: Threshold) -> Self {
        match threshold {
            Threshold::Five => 5,
            Threshold::Eight => 8,
            Threshold::Ten => 10,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationState {
    On,
    Off,
}

impl NotificationState {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationState::On => "ON",
            NotificationState::Off => "OFF",
        }
    }

    pub fn is_on(self) -> bool {
        self == NotificationState::On
    }

    /// Accepts either case; stored rows are always uppercase.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ON" => Some(NotificationState::On),
            "OFF" => Some(NotificationState::Off),
            _ => None,
        }
    }
}

/// Push token as persisted: base64 of the raw token the device registered with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedPushToken(String);

impl EncodedPushToken {
    pub fn encode(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(WatcherError::InvalidPushToken);
        }
        Ok(Self(STANDARD.encode(raw.as_bytes())))
    }

    pub fn from_stored(stored: String) -> Self {
        Self(stored)
    }

    pub fn decode(&self) -> Result<String> {
        let bytes = STANDARD
            .decode(self.0.as_bytes())
            .map_err(|_| WatcherError::InvalidPushToken)?;
        String::from_utf8(bytes).map_err(|_| WatcherError::InvalidPushToken)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedPushToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered subscriber: one push destination with its own alert threshold
/// and set of on-chain addresses to monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub push_token: EncodedPushToken,
    pub device_id: Option<String>,
    pub threshold: Threshold,
    pub token_price: Option<Decimal>,
    pub tx_notification: NotificationState,
    pub price_notification: NotificationState,
    pub addresses: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Watcher {
    /// A fresh registration: threshold 5, both notification paths on.
    pub fn new(push_token: EncodedPushToken, device_id: Option<String>, baseline: Decimal) -> Self {
        let now = Utc::now();
        Self {
            push_token,
            device_id,
            threshold: Threshold::default(),
            token_price: Some(baseline),
            tx_notification: NotificationState::On,
            price_notification: NotificationState::On,
            addresses: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Requested addresses this watcher does not track yet.
    pub fn untracked<'a, I>(&self, requested: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        requested
            .into_iter()
            .filter(|address| !self.addresses.contains(*address))
            .cloned()
            .collect()
    }
}

/// A single-column write. Updates never replace the whole record so that a
/// baseline write from an alert tick cannot clobber a concurrent settings change.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherField {
    TokenPrice(Decimal),
    Threshold(Threshold),
    TxNotification(NotificationState),
    PriceNotification(NotificationState),
    PushToken(EncodedPushToken),
}

/// Listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatcherFilter {
    pub tx_notification: Option<NotificationState>,
}

impl WatcherFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn price_alerts_enabled() -> Self {
        Self {
            tx_notification: Some(NotificationState::On),
        }
    }

    pub fn matches(&self, watcher: &Watcher) -> bool {
        self.tx_notification
            .is_none_or(|state| watcher.tx_notification == state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub title: String,
    pub body: String,
    pub sent: bool,
    pub timestamp: DateTime<Utc>,
}

// ==========================================
// 2. DATABASE ROWS (Postgres)
// ==========================================

/// Row of the 'watchers' table.
#[derive(Debug, Clone, FromRow)]
pub struct WatcherRow {
    pub push_token: String,
    pub device_id: Option<String>,
    pub threshold: i16,
    pub token_price: Option<Decimal>,
    pub tx_notification: String,
    pub price_notification: String,
    pub addresses: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WatcherRow> for Watcher {
    type Error = WatcherError;

    fn try_from(row: WatcherRow) -> Result<Self> {
        let flag = |value: &str| {
            NotificationState::parse(value).ok_or_else(|| {
                WatcherError::Database(sqlx::Error::Decode(
                    format!("unknown notification state '{}'", value).into(),
                ))
            })
        };

        Ok(Watcher {
            push_token: EncodedPushToken::from_stored(row.push_token),
            device_id: row.device_id,
            threshold: Threshold::try_from(i64::from(row.threshold))?,
            token_price: row.token_price,
            tx_notification: flag(&row.tx_notification)?,
            price_notification: flag(&row.price_notification)?,
            addresses: row.addresses.into_iter().collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// True for a 20-byte hex address, with or without a `0x` prefix.
pub fn is_valid_address(address: &str) -> bool {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);

    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };

    matches!(hex::decode(padded), Ok(bytes) if bytes.len() == 20)
}
