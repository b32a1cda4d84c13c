use super::ExplorerService;
use crate::config::KeepAliveConfig;
use crate::error::Result;
use crate::models::WatcherFilter;
use crate::watcher::WatcherRepository;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Reset,
}

/// Keeps the explorer aware of this service and of every watched address.
///
/// A session is `init`, a bulk re-subscribe, then `check` on a fixed cadence.
/// Once `max_retries` consecutive checks after the first failure have also
/// failed the session is abandoned and a new one starts from `init`, since the
/// explorer has most likely dropped our subscriptions.
pub struct KeepAlive {
    explorer: Arc<dyn ExplorerService>,
    repository: Arc<dyn WatcherRepository>,
    config: KeepAliveConfig,
}

impl KeepAlive {
    pub fn new(
        explorer: Arc<dyn ExplorerService>,
        repository: Arc<dyn WatcherRepository>,
        config: KeepAliveConfig,
    ) -> Self {
        Self {
            explorer,
            repository,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut first_session = true;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.explorer.init().await {
                error!(error = %e, "Explorer init failed");
                if !pause(self.config.retry_delay, &shutdown).await {
                    break;
                }
                continue;
            }

            match resubscribe_all(self.repository.as_ref(), self.explorer.as_ref()).await {
                Ok(count) if first_session => {
                    info!(addresses = count, "Loaded watcher subscriptions into explorer")
                }
                Ok(count) => info!(addresses = count, "Re-subscribed watchers after reset"),
                Err(e) => error!(error = %e, "Failed to load watchers for re-subscribe"),
            }
            first_session = false;

            if self.check_until_exhausted(&shutdown).await == SessionEnd::Cancelled {
                break;
            }
            warn!("Explorer stopped answering checks, resetting session");
        }

        info!("Explorer keep-alive stopped");
    }

    async fn check_until_exhausted(&self, shutdown: &CancellationToken) -> SessionEnd {
        let mut tries = self.config.max_retries;

        loop {
            match self.explorer.check().await {
                Ok(()) => {
                    tries = self.config.max_retries;
                    if !pause(self.config.interval, shutdown).await {
                        return SessionEnd::Cancelled;
                    }
                }
                Err(e) => {
                    error!(error = %e, tries_left = tries, "Explorer check failed");
                    if tries == 0 {
                        return SessionEnd::Reset;
                    }
                    tries -= 1;
                    if !pause(self.config.retry_delay, shutdown).await {
                        return SessionEnd::Cancelled;
                    }
                }
            }
        }
    }
}

pub async fn run_keep_alive(keep_alive: Arc<KeepAlive>, shutdown: CancellationToken) {
    keep_alive.run(shutdown).await
}

/// Walk the registry page by page and subscribe each page's addresses in one
/// call. A failed subscribe is logged and the walk continues; a failed page
/// load ends it. Returns the number of addresses announced.
pub async fn resubscribe_all(
    repository: &dyn WatcherRepository,
    explorer: &dyn ExplorerService,
) -> Result<usize> {
    let filter = WatcherFilter::all();
    let mut page = 1;
    let mut announced = 0;

    loop {
        let watchers = repository.list(&filter, page).await?;
        if watchers.is_empty() {
            break;
        }

        let addresses: Vec<String> = watchers
            .iter()
            .flat_map(|watcher| watcher.addresses.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !addresses.is_empty() {
            match explorer.subscribe(&addresses).await {
                Ok(()) => announced += addresses.len(),
                Err(e) => error!(page, error = %e, "Bulk subscribe failed"),
            }
        }

        page += 1;
    }

    Ok(announced)
}

/// Sleep unless shutdown comes first. Returns false when cancelled.
async fn pause(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
