use super::WatcherRepository;
use crate::error::{Result, WatcherError};
use crate::explorer::ExplorerService;
use crate::models::{
    EncodedPushToken, NotificationState, PriceHistory, Threshold, Watcher, WatcherField,
    is_valid_address,
};
use crate::price::PriceCache;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatcherUpdate {
    pub addresses: Option<Vec<String>>,
    pub threshold: Option<Threshold>,
    pub tx_notification: Option<NotificationState>,
    pub price_notification: Option<NotificationState>,
}

/// Watcher operations the request layer calls, including address
/// reconciliation against the explorer.
#[derive(Clone)]
pub struct WatcherService {
    repository: Arc<dyn WatcherRepository>,
    cache: Arc<dyn PriceCache>,
    explorer: Arc<dyn ExplorerService>,
}

impl WatcherService {
    pub fn new(
        repository: Arc<dyn WatcherRepository>,
        cache: Arc<dyn PriceCache>,
        explorer: Arc<dyn ExplorerService>,
    ) -> Self {
        Self {
            repository,
            cache,
            explorer,
        }
    }

    pub async fn get_watcher(&self, push_token: &str) -> Result<Watcher> {
        let token = EncodedPushToken::encode(push_token)?;
        self.require(&token).await
    }

    pub async fn get_history_prices(&self) -> Result<Option<PriceHistory>> {
        self.cache.history().await
    }

    /// Register a device. The baseline comes from the cached spot price, so
    /// without one nothing is created. An older watcher for the same device
    /// is replaced in the same write.
    pub async fn create_watcher(&self, push_token: &str, device_id: Option<&str>) -> Result<Watcher> {
        let token = EncodedPushToken::encode(push_token)?;

        if self.repository.find_by_push_token(token.as_str()).await?.is_some() {
            return Err(WatcherError::Conflict(
                "watcher for this token already exists".to_string(),
            ));
        }

        let baseline = self
            .cache
            .spot_price()
            .await?
            .ok_or_else(|| WatcherError::MissingBaseline("price data not found".to_string()))?;

        let device_id = device_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let watcher = Watcher::new(token, device_id, baseline.price);

        for previous in self.repository.insert(&watcher).await? {
            info!(
                device_id = ?watcher.device_id,
                push_token = %previous.push_token,
                "Replaced watcher for device"
            );
            self.release_addresses(&previous.push_token, &previous.addresses)
                .await;
        }

        info!(push_token = %watcher.push_token, "Watcher created");
        Ok(watcher)
    }

    /// Apply a partial update.
    ///
    /// Addresses are reconciled first: only ones the watcher does not already
    /// track are sent to the explorer, and they are persisted only once the
    /// explorer accepted them. A rejected subscribe aborts the whole update.
    /// The remaining fields are independent single-column writes.
    pub async fn update_watcher(&self, push_token: &str, update: WatcherUpdate) -> Result<Watcher> {
        let token = EncodedPushToken::encode(push_token)?;
        let watcher = self.require(&token).await?;

        if let Some(requested) = update.addresses.as_deref() {
            self.reconcile_addresses(&watcher, requested).await?;
        }

        let fields = [
            update.threshold.map(WatcherField::Threshold),
            update.tx_notification.map(WatcherField::TxNotification),
            update.price_notification.map(WatcherField::PriceNotification),
        ];
        for field in fields.into_iter().flatten() {
            if !self.repository.update_field(token.as_str(), field).await? {
                return Err(not_found());
            }
        }

        self.require(&token).await
    }

    /// Subscribe and persist the requested addresses the watcher lacks.
    /// Returns the addresses that were newly added.
    pub async fn reconcile_addresses(
        &self,
        watcher: &Watcher,
        requested: &[String],
    ) -> Result<BTreeSet<String>> {
        if let Some(bad) = requested.iter().find(|address| !is_valid_address(address)) {
            return Err(WatcherError::InvalidAddress(bad.clone()));
        }

        let fresh = watcher.untracked(requested);
        if fresh.is_empty() {
            return Ok(fresh);
        }

        let fresh_list: Vec<String> = fresh.iter().cloned().collect();
        self.explorer
            .subscribe(&fresh_list)
            .await
            .map_err(|e| WatcherError::ReconciliationFailure(e.to_string()))?;

        if !self
            .repository
            .add_addresses(watcher.push_token.as_str(), &fresh_list)
            .await?
        {
            return Err(not_found());
        }

        info!(push_token = %watcher.push_token, added = fresh_list.len(), "Addresses subscribed");
        Ok(fresh)
    }

    pub async fn delete_watcher(&self, push_token: &str) -> Result<()> {
        let token = EncodedPushToken::encode(push_token)?;
        let watcher = self.require(&token).await?;

        if !self.repository.delete_by_push_token(token.as_str()).await? {
            return Err(not_found());
        }
        self.release_addresses(&token, &watcher.addresses).await;

        info!(push_token = %token, "Watcher deleted");
        Ok(())
    }

    /// Stop watching the given addresses. Only addresses the watcher actually
    /// tracks are unsubscribed.
    pub async fn delete_watcher_addresses(&self, push_token: &str, addresses: &[String]) -> Result<()> {
        let token = EncodedPushToken::encode(push_token)?;
        let watcher = self.require(&token).await?;

        let tracked: Vec<String> = addresses
            .iter()
            .filter(|address| watcher.addresses.contains(*address))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if tracked.is_empty() {
            return Ok(());
        }

        self.release_addresses(&token, &tracked).await;
        if !self.repository.remove_addresses(token.as_str(), &tracked).await? {
            return Err(not_found());
        }
        Ok(())
    }

    pub async fn update_push_token(&self, old_token: &str, new_token: &str) -> Result<Watcher> {
        let old = EncodedPushToken::encode(old_token)?;
        let new = EncodedPushToken::encode(new_token)?;
        self.require(&old).await?;

        if old == new {
            return self.require(&old).await;
        }
        if self.repository.find_by_push_token(new.as_str()).await?.is_some() {
            return Err(WatcherError::Conflict(
                "watcher for this token already exists".to_string(),
            ));
        }

        if !self
            .repository
            .update_field(old.as_str(), WatcherField::PushToken(new.clone()))
            .await?
        {
            return Err(not_found());
        }
        self.require(&new).await
    }

    async fn require(&self, token: &EncodedPushToken) -> Result<Watcher> {
        self.repository
            .find_by_push_token(token.as_str())
            .await?
            .ok_or_else(not_found)
    }

    /// Unsubscribe addresses no other watcher still tracks. Best effort: the
    /// record is already gone or changed, so failures are only logged, and
    /// when the shared check fails nothing is unsubscribed.
    async fn release_addresses<'a, I>(&self, owner: &EncodedPushToken, addresses: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let addresses: Vec<String> = addresses.into_iter().cloned().collect();
        if addresses.is_empty() {
            return;
        }

        let shared = match self
            .repository
            .tracked_by_others(owner.as_str(), &addresses)
            .await
        {
            Ok(shared) => shared,
            Err(e) => {
                warn!(error = %e, "Could not check shared addresses, keeping subscriptions");
                return;
            }
        };

        let orphaned: Vec<String> = addresses
            .into_iter()
            .filter(|address| !shared.contains(address))
            .collect();
        if orphaned.is_empty() {
            return;
        }
        if let Err(e) = self.explorer.unsubscribe(&orphaned).await {
            warn!(error = %e, count = orphaned.len(), "Explorer unsubscribe failed");
        }
    }
}

fn not_found() -> WatcherError {
    WatcherError::NotFound("watcher not found".to_string())
}
