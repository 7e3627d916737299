use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use specsmith_core::catalog::StaticCatalog;
use specsmith_core::config::{expand_home, CatalogConfig};
use specsmith_core::error::{Result, SpecsmithError};

use crate::wire::parse_blocks;

const CACHE_FILE: &str = "blocks_cache.json";
const CACHE_METADATA_FILE: &str = "blocks_cache_metadata.json";

/// Where a loaded catalog came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// `catalog.path` was configured.
    LocalFile(PathBuf),
    /// Cache within `max_age_hours`.
    Cache,
    Api,
    /// API unavailable; cache older than `max_age_hours`.
    StaleCache,
    Fallback(PathBuf),
}

impl std::fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalFile(p) => write!(f, "file {}", p.display()),
            Self::Cache => f.write_str("cache"),
            Self::Api => f.write_str("api"),
            Self::StaleCache => f.write_str("stale cache"),
            Self::Fallback(p) => write!(f, "fallback {}", p.display()),
        }
    }
}

#[derive(Debug)]
pub struct LoadedCatalog {
    pub catalog: StaticCatalog,
    pub source: CatalogSource,
}

/// Written next to the cached blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub timestamp: DateTime<Utc>,
    pub blocks_count: usize,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Fresh,
    Stale,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub status: CacheStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_hours: Option<f64>,
    pub blocks_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub max_age_hours: u64,
}

/// Loads the block catalog from a local file, the on-disk cache, the remote
/// API or a fallback file, in that order of preference.
pub struct CatalogFetcher {
    config: CatalogConfig,
    cache_dir: PathBuf,
}

impl CatalogFetcher {
    pub fn new(config: CatalogConfig) -> Self {
        let cache_dir = config.cache_dir();
        Self { config, cache_dir }
    }

    /// Use a specific cache directory instead of the configured one.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    fn metadata_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_METADATA_FILE)
    }

    /// Load the catalog.
    ///
    /// A configured `path` is authoritative. Otherwise a fresh cache is used
    /// unless `force_refresh` is set, then the API (refreshing the cache),
    /// then a cache of any age, then `fallback_path`.
    pub async fn load(&self, force_refresh: bool) -> Result<LoadedCatalog> {
        if let Some(path) = &self.config.path {
            let path = expand_home(path);
            let catalog = read_catalog_file(&path).await?;
            info!(path = %path.display(), blocks = catalog.len(), "Loaded block catalog from file");
            return Ok(LoadedCatalog {
                catalog,
                source: CatalogSource::LocalFile(path),
            });
        }

        if !force_refresh {
            if let Some(catalog) = self.read_cache(true).await {
                return Ok(LoadedCatalog {
                    catalog,
                    source: CatalogSource::Cache,
                });
            }
        }

        match (&self.config.api_url, &self.config.api_key) {
            (Some(url), Some(key)) => match self.fetch_remote(url, key).await {
                Ok(doc) => {
                    let catalog = StaticCatalog::new(parse_blocks(&doc)?);
                    self.save_cache(&doc, catalog.len()).await;
                    return Ok(LoadedCatalog {
                        catalog,
                        source: CatalogSource::Api,
                    });
                }
                Err(e) => error!(error = %e, "Failed to fetch blocks from API"),
            },
            (Some(_), None) => warn!("catalog.api_key not configured, skipping API fetch"),
            _ => debug!("No catalog API configured"),
        }

        if let Some(catalog) = self.read_cache(false).await {
            info!(blocks = catalog.len(), "Using stale block cache");
            return Ok(LoadedCatalog {
                catalog,
                source: CatalogSource::StaleCache,
            });
        }

        if let Some(path) = &self.config.fallback_path {
            let path = expand_home(path);
            warn!(path = %path.display(), "Loading blocks from fallback file");
            let catalog = read_catalog_file(&path).await?;
            return Ok(LoadedCatalog {
                catalog,
                source: CatalogSource::Fallback(path),
            });
        }

        Err(SpecsmithError::CatalogUnavailable(
            "no catalog file, cache, API or fallback available".into(),
        ))
    }

    /// Report the state of the on-disk cache.
    pub async fn cache_info(&self) -> Result<CacheInfo> {
        let max_age_hours = self.config.max_age_hours;
        let Some(meta) = self.read_metadata().await? else {
            return Ok(CacheInfo {
                status: CacheStatus::Missing,
                timestamp: None,
                age_hours: None,
                blocks_count: 0,
                source: None,
                max_age_hours,
            });
        };

        let age_hours = age_hours(meta.timestamp);
        let status = if age_hours <= max_age_hours as f64 {
            CacheStatus::Fresh
        } else {
            CacheStatus::Stale
        };
        Ok(CacheInfo {
            status,
            timestamp: Some(meta.timestamp),
            age_hours: Some(age_hours),
            blocks_count: meta.blocks_count,
            source: Some(meta.source),
            max_age_hours,
        })
    }

    async fn fetch_remote(&self, url: &str, api_key: &str) -> Result<Value> {
        info!(url, "Fetching blocks from API");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.fetch_timeout_secs))
            .build()
            .map_err(|e| SpecsmithError::Catalog(format!("failed to create HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .header("X-API-Key", api_key)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| SpecsmithError::Catalog(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpecsmithError::Catalog(format!("HTTP {}: {}", status, body)));
        }

        let doc: Value = response
            .json()
            .await
            .map_err(|e| SpecsmithError::Catalog(format!("invalid blocks response: {}", e)))?;
        info!(
            blocks = doc.as_array().map(|a| a.len()).unwrap_or(0),
            "Fetched blocks from API"
        );
        Ok(doc)
    }

    /// Best effort: a cache write failure only costs a refetch later.
    async fn save_cache(&self, doc: &Value, blocks_count: usize) {
        let meta = CacheMetadata {
            timestamp: Utc::now(),
            blocks_count,
            source: "api".to_string(),
        };
        if let Err(e) = self.write_cache(doc, &meta).await {
            error!(error = %e, dir = %self.cache_dir.display(), "Failed to save blocks to cache");
        } else {
            info!(blocks = blocks_count, path = %self.cache_file().display(), "Cached blocks");
        }
    }

    async fn write_cache(&self, doc: &Value, meta: &CacheMetadata) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::write(self.cache_file(), serde_json::to_string_pretty(doc)?).await?;
        tokio::fs::write(self.metadata_file(), serde_json::to_string_pretty(meta)?).await?;
        Ok(())
    }

    async fn read_metadata(&self) -> Result<Option<CacheMetadata>> {
        let path = self.metadata_file();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Read the cached catalog. With `require_fresh`, a cache older than
    /// `max_age_hours` counts as missing. Unreadable caches are logged and
    /// treated as missing.
    async fn read_cache(&self, require_fresh: bool) -> Option<StaticCatalog> {
        if require_fresh {
            match self.read_metadata().await {
                Ok(Some(meta)) => {
                    let age = age_hours(meta.timestamp);
                    if age > self.config.max_age_hours as f64 {
                        info!(
                            age_hours = %format!("{:.1}", age),
                            max_age_hours = self.config.max_age_hours,
                            "Block cache is stale, will refresh"
                        );
                        return None;
                    }
                }
                Ok(None) => {
                    debug!("No block cache found");
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read block cache metadata");
                    return None;
                }
            }
        }

        let path = self.cache_file();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }
        match read_catalog_file(&path).await {
            Ok(catalog) => {
                debug!(blocks = catalog.len(), fresh = require_fresh, "Loaded blocks from cache");
                Some(catalog)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load block cache");
                None
            }
        }
    }
}

fn age_hours(timestamp: DateTime<Utc>) -> f64 {
    (Utc::now() - timestamp).num_seconds() as f64 / 3600.0
}

async fn read_catalog_file(path: &Path) -> Result<StaticCatalog> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SpecsmithError::Catalog(format!("cannot read {}: {}", path.display(), e)))?;
    let doc: Value = serde_json::from_str(&text)
        .map_err(|e| SpecsmithError::Catalog(format!("invalid JSON in {}: {}", path.display(), e)))?;
    Ok(StaticCatalog::new(parse_blocks(&doc)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use specsmith_core::traits::BlockCatalog;

    fn blocks_doc(ids: &[&str]) -> Value {
        Value::Array(ids.iter().map(|id| json!({"id": id})).collect())
    }

    fn config_in(dir: &Path) -> CatalogConfig {
        CatalogConfig {
            cache_dir: dir.join("cache").display().to_string(),
            fetch_timeout_secs: 2,
            ..Default::default()
        }
    }

    async fn seed_cache(fetcher: &CatalogFetcher, ids: &[&str], age: chrono::Duration) {
        let meta = CacheMetadata {
            timestamp: Utc::now() - age,
            blocks_count: ids.len(),
            source: "api".into(),
        };
        fetcher.write_cache(&blocks_doc(ids), &meta).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blocks.json");
        std::fs::write(&file, blocks_doc(&["A", "B"]).to_string()).unwrap();

        let config = CatalogConfig {
            path: Some(file.display().to_string()),
            ..config_in(dir.path())
        };
        let loaded = CatalogFetcher::new(config).load(false).await.unwrap();
        assert_eq!(loaded.source, CatalogSource::LocalFile(file));
        assert!(loaded.catalog.lookup("B").is_some());
    }

    #[tokio::test]
    async fn test_fresh_cache_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CatalogFetcher::new(config_in(dir.path()));
        seed_cache(&fetcher, &["Cached"], chrono::Duration::hours(1)).await;

        let loaded = fetcher.load(false).await.unwrap();
        assert_eq!(loaded.source, CatalogSource::Cache);
        assert!(loaded.catalog.lookup("Cached").is_some());
    }

    #[tokio::test]
    async fn test_api_failure_falls_back_to_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = CatalogConfig {
            // Nothing listens on port 9
            api_url: Some("http://127.0.0.1:9/api/blocks".into()),
            api_key: Some("key".into()),
            ..config_in(dir.path())
        };
        let fetcher = CatalogFetcher::new(config);
        seed_cache(&fetcher, &["Old"], chrono::Duration::hours(48)).await;

        let loaded = fetcher.load(false).await.unwrap();
        assert_eq!(loaded.source, CatalogSource::StaleCache);
        assert!(loaded.catalog.lookup("Old").is_some());
    }

    #[tokio::test]
    async fn test_force_refresh_skips_fresh_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CatalogFetcher::new(config_in(dir.path()));
        seed_cache(&fetcher, &["Cached"], chrono::Duration::minutes(5)).await;

        // No API configured, so the cache is still the answer, just not as "fresh"
        let loaded = fetcher.load(true).await.unwrap();
        assert_eq!(loaded.source, CatalogSource::StaleCache);
    }

    #[tokio::test]
    async fn test_fallback_file_last() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback.json");
        std::fs::write(&fallback, blocks_doc(&["Fallback"]).to_string()).unwrap();

        let config = CatalogConfig {
            fallback_path: Some(fallback.display().to_string()),
            ..config_in(dir.path())
        };
        let loaded = CatalogFetcher::new(config).load(false).await.unwrap();
        assert_eq!(loaded.source, CatalogSource::Fallback(fallback));
    }

    #[tokio::test]
    async fn test_nothing_available() {
        let dir = tempfile::tempdir().unwrap();
        let err = CatalogFetcher::new(config_in(dir.path()))
            .load(false)
            .await
            .unwrap_err();
        assert!(matches!(err, SpecsmithError::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cache_info() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CatalogFetcher::new(config_in(dir.path()));

        let info = fetcher.cache_info().await.unwrap();
        assert_eq!(info.status, CacheStatus::Missing);
        assert_eq!(info.max_age_hours, 24);

        seed_cache(&fetcher, &["A", "B", "C"], chrono::Duration::hours(2)).await;
        let info = fetcher.cache_info().await.unwrap();
        assert_eq!(info.status, CacheStatus::Fresh);
        assert_eq!(info.blocks_count, 3);
        assert_eq!(info.source.as_deref(), Some("api"));
        let age = info.age_hours.unwrap();
        assert!((1.9..2.1).contains(&age));

        seed_cache(&fetcher, &["A"], chrono::Duration::hours(30)).await;
        assert_eq!(fetcher.cache_info().await.unwrap().status, CacheStatus::Stale);
    }

    #[tokio::test]
    async fn test_with_cache_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = CatalogFetcher::new(CatalogConfig::default()).with_cache_dir(dir.path());
        assert_eq!(fetcher.cache_file(), dir.path().join(CACHE_FILE));
        assert_eq!(fetcher.cache_info().await.unwrap().status, CacheStatus::Missing);
    }
}
