use crate::error::Result;
use crate::models::{self, NotificationRecord, Watcher, WatcherField, WatcherFilter};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeSet;

/// Notifications kept per watcher before the oldest are dropped.
pub const NOTIFICATION_HISTORY_LIMIT: i64 = 10_000;

/// Sole owner of persisted watcher state.
///
/// Every mutation is field-scoped: callers never write a whole record back, so
/// concurrent writers touching different fields cannot lose each other's work.
/// Methods returning `bool` report whether a record matched the token.
#[async_trait]
pub trait WatcherRepository: Send + Sync {
    async fn find_by_push_token(&self, push_token: &str) -> Result<Option<Watcher>>;
    /// One page (1-based). An empty page means the listing is exhausted.
    async fn list(&self, filter: &WatcherFilter, page: u32) -> Result<Vec<Watcher>>;
    /// Insert `watcher`, atomically removing any watcher registered for the
    /// same device. Returns the removed watchers.
    async fn insert(&self, watcher: &Watcher) -> Result<Vec<Watcher>>;
    async fn update_field(&self, push_token: &str, field: WatcherField) -> Result<bool>;
    async fn add_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool>;
    async fn remove_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool>;
    async fn delete_by_push_token(&self, push_token: &str) -> Result<bool>;
    /// The subset of `addresses` tracked by any watcher except `push_token`.
    async fn tracked_by_others(&self, push_token: &str, addresses: &[String]) -> Result<BTreeSet<String>>;
    async fn record_notification(&self, push_token: &str, record: &NotificationRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct PgWatcherRepository {
    pool: PgPool,
}

impl PgWatcherRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatcherRepository for PgWatcherRepository {
    async fn find_by_push_token(&self, push_token: &str) -> Result<Option<Watcher>> {
        models::get_watcher_by_push_token(&self.pool, push_token).await
    }

    async fn list(&self, filter: &WatcherFilter, page: u32) -> Result<Vec<Watcher>> {
        models::list_watchers(&self.pool, filter, page).await
    }

    async fn insert(&self, watcher: &Watcher) -> Result<Vec<Watcher>> {
        models::insert_watcher(&self.pool, watcher).await
    }

    async fn update_field(&self, push_token: &str, field: WatcherField) -> Result<bool> {
        models::update_watcher_field(&self.pool, push_token, &field).await
    }

    async fn add_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool> {
        models::add_watcher_addresses(&self.pool, push_token, addresses).await
    }

    async fn remove_addresses(&self, push_token: &str, addresses: &[String]) -> Result<bool> {
        models::remove_watcher_addresses(&self.pool, push_token, addresses).await
    }

    async fn delete_by_push_token(&self, push_token: &str) -> Result<bool> {
        models::delete_watcher_by_push_token(&self.pool, push_token).await
    }

    async fn tracked_by_others(&self, push_token: &str, addresses: &[String]) -> Result<BTreeSet<String>> {
        let shared = models::addresses_tracked_by_others(&self.pool, push_token, addresses).await?;
        Ok(shared.into_iter().collect())
    }

    async fn record_notification(&self, push_token: &str, record: &NotificationRecord) -> Result<()> {
        models::insert_notification(&self.pool, push_token, record, NOTIFICATION_HISTORY_LIMIT).await
    }
}
