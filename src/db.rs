use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Creates a connection pool to the Postgres database
pub async fn get_db_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")
}

/// Creates the watcher tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS watchers (
            push_token          TEXT PRIMARY KEY,
            device_id           TEXT,
            threshold           SMALLINT NOT NULL CHECK (threshold IN (5, 8, 10)),
            token_price         NUMERIC,
            tx_notification     TEXT NOT NULL CHECK (tx_notification IN ('ON', 'OFF')),
            price_notification  TEXT NOT NULL CHECK (price_notification IN ('ON', 'OFF')),
            addresses           TEXT[] NOT NULL DEFAULT '{}',
            created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        "CREATE UNIQUE INDEX IF NOT EXISTS watchers_device_id_key ON watchers (device_id) WHERE device_id IS NOT NULL",
        "CREATE INDEX IF NOT EXISTS watchers_tx_notification_idx ON watchers (tx_notification)",
        r#"
        CREATE TABLE IF NOT EXISTS watcher_notifications (
            id          BIGSERIAL PRIMARY KEY,
            push_token  TEXT NOT NULL REFERENCES watchers (push_token)
                            ON DELETE CASCADE ON UPDATE CASCADE,
            title       TEXT NOT NULL,
            body        TEXT NOT NULL,
            sent        BOOLEAN NOT NULL,
            timestamp   TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS watcher_notifications_token_idx ON watcher_notifications (push_token, timestamp DESC)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply watcher schema")?;
    }

    Ok(())
}
