//! In-memory stand-ins for the cache, the registry, the push backend and the
//! explorer, shared by the unit tests.

use crate::error::{Result, WatcherError};
use crate::explorer::ExplorerService;
use crate::models::{
    EncodedPushToken, NotificationRecord, PriceHistory, PriceSnapshot, Watcher, WatcherField,
    WatcherFilter,
};
use crate::notify::{PushMessage, PushTransport};
use crate::price::{PriceCache, PriceSource};
use crate::watcher::WatcherRepository;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

// ==========================================
// PRICES
// ==========================================

#[derive(Default)]
pub struct MemoryPriceCache {
    spot: Mutex<Option<PriceSnapshot>>,
    history: Mutex<Option<PriceHistory>>,
}

impl MemoryPriceCache {
    pub fn with_spot(price: Decimal) -> Self {
        let cache = Self::default();
        cache.set_spot(price);
        cache
    }

    pub fn set_spot(&self, price: Decimal) {
        *self.spot.lock().unwrap() = Some(PriceSnapshot::now(price));
    }

    pub fn clear_spot(&self) {
        *self.spot.lock().unwrap() = None;
    }
}

#[async_trait]
impl PriceCache for MemoryPriceCache {
    async fn spot_price(&self) -> Result<Option<PriceSnapshot>> {
        Ok(self.spot.lock().unwrap().clone())
    }

    async fn store_spot_price(&self, snapshot: &PriceSnapshot) -> Result<()> {
        *self.spot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    async fn history(&self) -> Result<Option<PriceHistory>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn store_history(&self, history: &PriceHistory) -> Result<()> {
        *self.history.lock().unwrap() = Some(history.clone());
        Ok(())
    }
}

/// Answers with fixed values; anything not configured is an upstream error.
#[derive(Default)]
pub struct ScriptedPriceSource {
    spot: Option<Decimal>,
    history: Option<PriceHistory>,
}

impl ScriptedPriceSource {
    pub fn with_spot(price: Decimal) -> Self {
        Self {
            spot: Some(price),
            history: None,
        }
    }

    pub fn with_history(history: PriceHistory) -> Self {
        Self {
            spot: None,
            history: Some(history),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn fetch_spot_price(&self) -> Result<Decimal> {
        self.spot
            .ok_or_else(|| WatcherError::StaleData("upstream unavailable".into()))
    }

    async fn fetch_history(&self) -> Result<PriceHistory> {
        self.history
            .clone()
            .ok_or_else(|| WatcherError::StaleData("upstream unavailable".into()))
    }
}

// ==========================================
// REGISTRY
// ==========================================

#[derive(Default)]
struct Registry {
    // insertion order stands in for created_at ordering
    order: Vec<String>,
    watchers: HashMap<String, Watcher>,
    notifications: HashMap<String, Vec<NotificationRecord>>,
}

pub struct MemoryWatcherRepository {
    page_size: usize,
    state: Mutex<Registry>,
    add_calls: AtomicUsize,
}

impl Default for MemoryWatcherRepository {
    fn default() -> Self {
        Self::with_page_size(100)
    }
}

impl MemoryWatcherRepository {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            state: Mutex::new(Registry::default()),
            add_calls: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, watcher: Watcher) {
        let mut state = self.state.lock().unwrap();
        let key = watcher.push_token.as_str().to_string();
        if !state.watchers.contains_key(&key) {
            state.order.push(key.clone());
        }
        state.watchers.insert(key, watcher);
    }

    /// Look up by the raw (unencoded) token.
    pub fn get(&self, raw_token: &str) -> Option<Watcher> {
        let key = encoded(raw_token);
        self.state.lock().unwrap().watchers.get(&key).cloned()
    }

    pub fn notifications(&self, raw_token: &str) -> Vec<NotificationRecord> {
        let key = encoded(raw_token);
        self.state
            .lock()
            .unwrap()
            .notifications
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().watchers.len()
    }

    pub fn add_address_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    fn modify<F: FnOnce(&mut Watcher)>(&self, push_token: &str, change: F) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.watchers.get_mut(push_token) {
            Some(watcher) => {
                change(watcher);
                watcher.updated_at = chrono::Utc::now();
                true
            }
            None => false,
        }
    }
}

fn encoded(raw_token: &str) -> String {
    EncodedPushToken::encode(raw_token).unwrap().as_str().to_string()
}

#[async_trait]
impl WatcherRepository for MemoryWatcherRepository {
    async fn find_by_push_token(&self, push_token: &str) -> Result<Option<Watcher>> {
        Ok(self.state.lock().unwrap().watchers.get(push_token).cloned())
    }

    async fn list(&self, filter: &WatcherFilter, page: u32) -> Result<Vec<Watcher>> {
        let state = self.state.lock().unwrap();
        let skip = (page.max(1) as usize - 1) * self.page_size;
        Ok(state
            .order
            .iter()
            .filter_map(|key| state.watchers.get(key))
            .filter(|watcher| filter.matches(watcher))
            .skip(skip)
            .take(self.page_size)
            .cloned()
            .collect())
    }

    async fn insert(&self, watcher: &Watcher) -> Result<Vec<Watcher>> {
        let mut state = self.state.lock().unwrap();
        let key = watcher.push_token.as_str().to_string();
        if state.watchers.contains_key(&key) {
            return Err(WatcherError::Conflict(
                "watcher for this token already exists".into(),
            ));
        }

        let replaced: Vec<String> = match &watcher.device_id {
            Some(device_id) => state
                .order
                .iter()
                .filter(|k| {
                    state.watchers.get(*k).and_then(|w| w.device_id.as_deref())
                        == Some(device_id.as_str())
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let mut removed = Vec::new();
        for k in &replaced {
            state.order.retain(|existing| existing != k);
            state.notifications.remove(k);
            removed.extend(state.watchers.remove(k));
        }

        state.order.push(key.clone());
        state.watchers.insert(key, watcher.clone());
        Ok(removed)
    }

    async fn update_field(&self, push_token: &str, field: WatcherField) -> Result<bool> {
        if let WatcherField::PushToken(new_token) = field {
            let mut state = self.state.lock().unwrap();
            let new_key = new_token.as_str().to_string();
            if state.watchers.contains_key(&new_key) {
                return Err(WatcherError::Conflict("push_token already in use".into()));
            }
            let Some(mut watcher) = state.watchers.remove(push_token) else {
                return Ok(false);
            };
            watcher.push_token = new_token;
            state.watchers.insert(new_key.clone(), watcher);
            for key in state.order.iter_mut() {
                if key == push_token {
                    *key = new_key.clone();
                }
            }
            if let Some(history) = state.notifications.remove(push_token) {
                state.notifications.insert(new_key, history);
            }
            return Ok(true);
        }

        Ok(self.modify(push_token, |watcher| match field {
            WatcherField::TokenPrice(price) => watcher.token_price = Some(price),
            WatcherField::Threshold(threshold) => watcher.threshold = threshold,
            WatcherField::TxNotification(state) => watcher.tx_notification = state,
            WatcherField::PriceNotification(state) => watcher.price_notification = state,
            WatcherField::PushToken(_) => {}
        }))
    }

    async fn add_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.modify(push_token, |watcher| {
            watcher.addresses.extend(addresses.iter().cloned());
        }))
    }

    async fn remove_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool> {
        let removed: BTreeSet<&String> = addresses.iter().collect();
        Ok(self.modify(push_token, |watcher| {
            watcher.addresses.retain(|address| !removed.contains(address));
        }))
    }

    async fn delete_by_push_token(&self, push_token: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.order.retain(|key| key != push_token);
        state.notifications.remove(push_token);
        Ok(state.watchers.remove(push_token).is_some())
    }

    async fn tracked_by_others(&self, push_token: &str, addresses: &[String]) -> Result<BTreeSet<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .watchers
            .iter()
            .filter(|(key, _)| key.as_str() != push_token)
            .flat_map(|(_, watcher)| watcher.addresses.iter())
            .filter(|address| addresses.contains(*address))
            .cloned()
            .collect())
    }

    async fn record_notification(&self, push_token: &str, record: &NotificationRecord) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .notifications
            .entry(push_token.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }
}

/// Yields to the scheduler before every call so concurrent callers
/// interleave between their reads and writes.
pub struct YieldingRepository<R: ?Sized>(pub Arc<R>);

#[async_trait]
impl<R: WatcherRepository + ?Sized> WatcherRepository for YieldingRepository<R> {
    async fn find_by_push_token(&self, push_token: &str) -> Result<Option<Watcher>> {
        tokio::task::yield_now().await;
        self.0.find_by_push_token(push_token).await
    }

    async fn list(&self, filter: &WatcherFilter, page: u32) -> Result<Vec<Watcher>> {
        tokio::task::yield_now().await;
        self.0.list(filter, page).await
    }

    async fn insert(&self, watcher: &Watcher) -> Result<Vec<Watcher>> {
        tokio::task::yield_now().await;
        self.0.insert(watcher).await
    }

    async fn update_field(&self, push_token: &str, field: WatcherField) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.update_field(push_token, field).await
    }

    async fn add_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.add_addresses(push_token, addresses).await
    }

    async fn remove_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.remove_addresses(push_token, addresses).await
    }

    async fn delete_by_push_token(&self, push_token: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.delete_by_push_token(push_token).await
    }

    async fn tracked_by_others(&self, push_token: &str, addresses: &[String]) -> Result<BTreeSet<String>> {
        tokio::task::yield_now().await;
        self.0.tracked_by_others(push_token, addresses).await
    }

    async fn record_notification(&self, push_token: &str, record: &NotificationRecord) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.record_notification(push_token, record).await
    }
}

// ==========================================
// PUSH
// ==========================================

/// Records successful deliveries; tokens registered with `fail_for` are refused.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<PushMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn fail_for(&self, raw_token: &str) {
        self.failing.lock().unwrap().insert(raw_token.to_string());
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(&self, message: &PushMessage) -> Result<String> {
        if self.failing.lock().unwrap().contains(&message.token) {
            return Err(WatcherError::DeliveryFailure("token not registered".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("message-{}", sent.len()))
    }
}

// ==========================================
// EXPLORER
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerCall {
    Init,
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Check,
}

/// Records every call, including the ones it was told to fail.
#[derive(Default)]
pub struct ScriptedExplorer {
    calls: Mutex<Vec<ExplorerCall>>,
    failing_inits: Mutex<u32>,
    failing_checks: Mutex<u32>,
    failing_subscribe: Mutex<bool>,
}

impl ScriptedExplorer {
    pub fn calls(&self) -> Vec<ExplorerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count<F: Fn(&ExplorerCall) -> bool>(&self, predicate: F) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    pub fn fail_next_inits(&self, count: u32) {
        *self.failing_inits.lock().unwrap() = count;
    }

    pub fn fail_next_checks(&self, count: u32) {
        *self.failing_checks.lock().unwrap() = count;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        *self.failing_subscribe.lock().unwrap() = fail;
    }

    fn record(&self, call: ExplorerCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

fn explorer_down() -> WatcherError {
    WatcherError::StaleData("explorer unavailable".into())
}

#[async_trait]
impl ExplorerService for ScriptedExplorer {
    async fn init(&self) -> Result<()> {
        self.record(ExplorerCall::Init);
        if Self::take_failure(&self.failing_inits) {
            return Err(explorer_down());
        }
        Ok(())
    }

    async fn subscribe(&self, addresses: &[String]) -> Result<()> {
        self.record(ExplorerCall::Subscribe(addresses.to_vec()));
        if *self.failing_subscribe.lock().unwrap() {
            return Err(explorer_down());
        }
        Ok(())
    }

    async fn unsubscribe(&self, addresses: &[String]) -> Result<()> {
        self.record(ExplorerCall::Unsubscribe(addresses.to_vec()));
        Ok(())
    }

    async fn check(&self) -> Result<()> {
        self.record(ExplorerCall::Check);
        if Self::take_failure(&self.failing_checks) {
            return Err(explorer_down());
        }
        Ok(())
    }
}
