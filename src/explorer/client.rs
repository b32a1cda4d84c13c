use crate::error::Result;
use crate::models::WatchAction;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// External address-watching service.
#[async_trait]
pub trait ExplorerService: Send + Sync {
    /// Announce this service and its callback url.
    async fn init(&self) -> Result<()>;
    async fn subscribe(&self, addresses: &[String]) -> Result<()>;
    async fn unsubscribe(&self, addresses: &[String]) -> Result<()>;
    /// Liveness check used by the keep-alive loop.
    async fn check(&self) -> Result<()>;
}

pub struct HttpExplorerClient {
    client: reqwest::Client,
    watch_url: Url,
    explorer_id: String,
    callback_url: String,
}

impl HttpExplorerClient {
    pub fn new(
        explorer_url: &str,
        explorer_id: String,
        callback_url: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base = Url::parse(&format!("{}/", explorer_url.trim_end_matches('/')))?;
        let watch_url = base.join("watch")?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            watch_url,
            explorer_id,
            callback_url,
        })
    }

    async fn post(&self, action: &WatchAction<'_>) -> Result<()> {
        debug!(url = %self.watch_url, body = ?action, "Explorer request");

        self.client
            .post(self.watch_url.clone())
            .header("Accept", "application/json")
            .json(action)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[async_trait]
impl ExplorerService for HttpExplorerClient {
    async fn init(&self) -> Result<()> {
        self.post(&WatchAction::Init {
            id: &self.explorer_id,
            url: &self.callback_url,
        })
        .await
    }

    async fn subscribe(&self, addresses: &[String]) -> Result<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.post(&WatchAction::Subscribe {
            id: &self.explorer_id,
            addresses,
        })
        .await
    }

    async fn unsubscribe(&self, addresses: &[String]) -> Result<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.post(&WatchAction::Unsubscribe {
            id: &self.explorer_id,
            addresses,
        })
        .await
    }

    async fn check(&self) -> Result<()> {
        self.post(&WatchAction::Check {
            id: &self.explorer_id,
        })
        .await
    }
}
