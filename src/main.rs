use anyhow::{Context, Result};
use price_watcher::alerts::{self, AlertEngine};
use price_watcher::config::Config;
use price_watcher::db;
use price_watcher::explorer::{self, HttpExplorerClient, KeepAlive};
use price_watcher::notify::{
    FcmTransport, NotificationDispatcher, ServiceAccountKey, ServiceAccountTokens,
};
use price_watcher::price::{self, HttpPriceSource, PriceCache, PriceSource, RedisPriceCache};
use price_watcher::redis::RedisClient;
use price_watcher::tasks::TaskSet;
use price_watcher::watcher::{PgWatcherRepository, WatcherRepository};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Config::from_env().context("failed to load config")?;

    info!(
        token = %config.token_symbol,
        explorer = %config.explorer_url,
        alert_tick_secs = config.alert_tick.as_secs(),
        keep_alive_secs = config.keep_alive.interval.as_secs(),
        "🚀 Starting price watcher"
    );

    let pool = db::get_db_pool(&config.database_url, config.db_max_connections).await?;
    db::ensure_schema(&pool).await?;

    let redis = RedisClient::new(&config.feeder.redis_url).await?;
    redis.ping().await?;

    let repository: Arc<dyn WatcherRepository> = Arc::new(PgWatcherRepository::new(pool));
    let cache: Arc<dyn PriceCache> = Arc::new(RedisPriceCache::new(redis));
    let source: Arc<dyn PriceSource> = Arc::new(HttpPriceSource::new(
        config.feeder.token_price_url.clone(),
        config.feeder.history_url.clone(),
        config.feeder.http_timeout,
    )?);

    let firebase_key = ServiceAccountKey::from_file(&config.firebase_cred_path)?;
    let tokens = ServiceAccountTokens::new(firebase_key, config.feeder.http_timeout)?;
    let project_id = tokens.project_id().to_string();
    let transport = FcmTransport::new(
        &project_id,
        Arc::new(tokens),
        config.android_channel.clone(),
        config.feeder.http_timeout,
    )?;
    let engine = Arc::new(AlertEngine::new(
        cache.clone(),
        repository.clone(),
        NotificationDispatcher::new(Arc::new(transport)),
        config.token_symbol.clone(),
    ));

    let explorer_client = HttpExplorerClient::new(
        &config.explorer_url,
        config.explorer_token.clone(),
        config.callback_url.clone(),
        config.feeder.http_timeout,
    )?;
    let keep_alive = Arc::new(KeepAlive::new(
        Arc::new(explorer_client),
        repository.clone(),
        config.keep_alive.clone(),
    ));

    let mut tasks = TaskSet::new();
    {
        let (source, cache, period) = (source.clone(), cache.clone(), config.feeder.spot_refresh);
        tasks.spawn("spot-refresh", move |shutdown| {
            price::run_spot_refresh(source, cache, period, shutdown)
        });
    }
    {
        let (source, cache, period) = (source.clone(), cache.clone(), config.feeder.history_refresh);
        tasks.spawn("history-refresh", move |shutdown| {
            price::run_history_refresh(source, cache, period, shutdown)
        });
    }
    {
        let period = config.alert_tick;
        tasks.spawn("alert-evaluation", move |shutdown| {
            alerts::run_alert_loop(engine, period, shutdown)
        });
    }
    tasks.spawn("explorer-keep-alive", move |shutdown| {
        explorer::run_keep_alive(keep_alive, shutdown)
    });

    info!(tasks = tasks.len(), "All tasks running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Shutdown signal received, stopping tasks");
    let panicked = tasks.shutdown().await;
    info!(panicked, "Shutdown complete");

    Ok(())
}
