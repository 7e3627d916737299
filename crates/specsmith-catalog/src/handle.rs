use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use specsmith_core::catalog::StaticCatalog;

use crate::fetcher::CatalogFetcher;

/// Shared, swappable block catalog.
///
/// Readers take an `Arc` snapshot and keep using it for as long as they like;
/// a refresh swaps in a new catalog without touching snapshots already
/// handed out. An edit cycle should take exactly one snapshot.
#[derive(Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<StaticCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: StaticCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn snapshot(&self) -> Arc<StaticCatalog> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, catalog: StaticCatalog) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(catalog);
    }

    /// Reload through `fetcher` every `interval` until `cancel` fires.
    /// A failed reload keeps the current catalog.
    pub fn spawn_refresh(
        &self,
        fetcher: CatalogFetcher,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Catalog refresh started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {
                        info!("Catalog refresh shutting down");
                        break;
                    }
                }

                match fetcher.load(true).await {
                    Ok(loaded) => {
                        info!(
                            blocks = loaded.catalog.len(),
                            source = %loaded.source,
                            "Block catalog refreshed"
                        );
                        handle.replace(loaded.catalog);
                    }
                    Err(e) => warn!(error = %e, "Catalog refresh failed, keeping current catalog"),
                }
            }
        })
    }
}
