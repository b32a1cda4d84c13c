use super::{NotificationRecord, Watcher, WatcherField, WatcherFilter, WatcherRow};
use crate::error::{Result, WatcherError};
use sqlx::PgPool;

pub const PAGE_SIZE: i64 = 100;

const WATCHER_COLUMNS: &str = r#"
    push_token,
    device_id,
    threshold,
    token_price,
    tx_notification,
    price_notification,
    addresses,
    created_at,
    updated_at
"#;

// ==========================================
// WATCHER LOOKUPS
// ==========================================

/// Get watcher by (encoded) push token
pub async fn get_watcher_by_push_token(pool: &PgPool, push_token: &str) -> Result<Option<Watcher>> {
    let row = sqlx::query_as::<_, WatcherRow>(&format!(
        "SELECT {} FROM watchers WHERE push_token = $1",
        WATCHER_COLUMNS
    ))
    .bind(push_token)
    .fetch_optional(pool)
    .await?;

    row.map(Watcher::try_from).transpose()
}

/// List one page of watchers (1-based), oldest first
pub async fn list_watchers(pool: &PgPool, filter: &WatcherFilter, page: u32) -> Result<Vec<Watcher>> {
    let offset = i64::from(page.max(1) - 1) * PAGE_SIZE;

    let rows = sqlx::query_as::<_, WatcherRow>(&format!(
        r#"
        SELECT {}
        FROM watchers
        WHERE ($1::TEXT IS NULL OR tx_notification = $1)
        ORDER BY created_at, push_token
        LIMIT $2 OFFSET $3
        "#,
        WATCHER_COLUMNS
    ))
    .bind(filter.tx_notification.map(|state| state.as_str()))
    .bind(PAGE_SIZE)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Watcher::try_from).collect()
}

// ==========================================
// WATCHER WRITES
// ==========================================

/// Insert a new watcher. Any watcher registered for the same device is
/// deleted in the same transaction and returned.
pub async fn insert_watcher(pool: &PgPool, watcher: &Watcher) -> Result<Vec<Watcher>> {
    let addresses: Vec<String> = watcher.addresses.iter().cloned().collect();
    let mut tx = pool.begin().await?;

    let replaced = match &watcher.device_id {
        Some(device_id) => {
            sqlx::query_as::<_, WatcherRow>(&format!(
                "DELETE FROM watchers WHERE device_id = $1 RETURNING {}",
                WATCHER_COLUMNS
            ))
            .bind(device_id)
            .fetch_all(&mut *tx)
            .await?
        }
        None => Vec::new(),
    };

    sqlx::query(
        r#"
        INSERT INTO watchers (
            push_token, device_id, threshold, token_price,
            tx_notification, price_notification, addresses, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(watcher.push_token.as_str())
    .bind(&watcher.device_id)
    .bind(i64::from(watcher.threshold) as i16)
    .bind(watcher.token_price)
    .bind(watcher.tx_notification.as_str())
    .bind(watcher.price_notification.as_str())
    .bind(&addresses)
    .bind(watcher.created_at)
    .bind(watcher.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, "watcher for this token or device already exists"))?;

    tx.commit().await?;
    replaced.into_iter().map(Watcher::try_from).collect()
}

/// Update a single column. Returns false when no row matched.
pub async fn update_watcher_field(pool: &PgPool, push_token: &str, field: &WatcherField) -> Result<bool> {
    let (column, query) = match field {
        WatcherField::TokenPrice(price) => (
            "token_price",
            sqlx::query(
                "UPDATE watchers SET token_price = $2, updated_at = NOW() WHERE push_token = $1",
            )
            .bind(push_token)
            .bind(*price),
        ),
        WatcherField::Threshold(threshold) => (
            "threshold",
            sqlx::query(
                "UPDATE watchers SET threshold = $2, updated_at = NOW() WHERE push_token = $1",
            )
            .bind(push_token)
            .bind(i64::from(*threshold) as i16),
        ),
        WatcherField::TxNotification(state) => (
            "tx_notification",
            sqlx::query(
                "UPDATE watchers SET tx_notification = $2, updated_at = NOW() WHERE push_token = $1",
            )
            .bind(push_token)
            .bind(state.as_str()),
        ),
        WatcherField::PriceNotification(state) => (
            "price_notification",
            sqlx::query(
                "UPDATE watchers SET price_notification = $2, updated_at = NOW() WHERE push_token = $1",
            )
            .bind(push_token)
            .bind(state.as_str()),
        ),
        WatcherField::PushToken(token) => (
            "push_token",
            sqlx::query(
                "UPDATE watchers SET push_token = $2, updated_at = NOW() WHERE push_token = $1",
            )
            .bind(push_token)
            .bind(token.as_str().to_string()),
        ),
    };

    let done = query
        .execute(pool)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("{} already in use", column)))?;

    Ok(done.rows_affected() > 0)
}

/// Union the given addresses into the stored set
pub async fn add_watcher_addresses(pool: &PgPool, push_token: &str, addresses: &[String]) -> Result<bool> {
    let done = sqlx::query(
        r#"
        UPDATE watchers
        SET addresses = ARRAY(
                SELECT DISTINCT a FROM UNNEST(addresses || $2::TEXT[]) AS a ORDER BY a
            ),
            updated_at = NOW()
        WHERE push_token = $1
        "#,
    )
    .bind(push_token)
    .bind(addresses)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() > 0)
}

/// Remove the given addresses from the stored set
pub async fn remove_watcher_addresses(pool: &PgPool, push_token: &str, addresses: &[String]) -> Result<bool> {
    let done = sqlx::query(
        r#"
        UPDATE watchers
        SET addresses = ARRAY(
                SELECT a FROM UNNEST(addresses) AS a WHERE a <> ALL($2::TEXT[]) ORDER BY a
            ),
            updated_at = NOW()
        WHERE push_token = $1
        "#,
    )
    .bind(push_token)
    .bind(addresses)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() > 0)
}

pub async fn delete_watcher_by_push_token(pool: &PgPool, push_token: &str) -> Result<bool> {
    let done = sqlx::query("DELETE FROM watchers WHERE push_token = $1")
        .bind(push_token)
        .execute(pool)
        .await?;

    Ok(done.rows_affected() > 0)
}

/// Which of `addresses` are still tracked by a watcher other than `push_token`
pub async fn addresses_tracked_by_others(
    pool: &PgPool,
    push_token: &str,
    addresses: &[String],
) -> Result<Vec<String>> {
    let shared = sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT a
        FROM watchers, UNNEST(addresses) AS a
        WHERE push_token <> $1 AND a = ANY($2::TEXT[])
        "#,
    )
    .bind(push_token)
    .bind(addresses)
    .fetch_all(pool)
    .await?;

    Ok(shared)
}

// ==========================================
// NOTIFICATION HISTORY
// ==========================================

/// Append a notification and keep only the newest `keep` entries per watcher
pub async fn insert_notification(
    pool: &PgPool,
    push_token: &str,
    record: &NotificationRecord,
    keep: i64,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO watcher_notifications (push_token, title, body, sent, timestamp)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(push_token)
    .bind(&record.title)
    .bind(&record.body)
    .bind(record.sent)
    .bind(record.timestamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM watcher_notifications
        WHERE push_token = $1
        AND id NOT IN (
            SELECT id FROM watcher_notifications
            WHERE push_token = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT $2
        )
        "#,
    )
    .bind(push_token)
    .bind(keep)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn conflict_on_unique(error: sqlx::Error, message: &str) -> WatcherError {
    match error {
        sqlx::Error::Database(e) if e.is_unique_violation() => {
            WatcherError::Conflict(message.to_string())
        }
        e => e.into(),
    }
}
