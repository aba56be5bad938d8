//! Wiring shared by the binaries: transport, offline cache and API client.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::http::{Fetcher, HttpFetcher};
use crate::offline::store::SqliteCacheStorage;
use crate::offline::OfflineCache;

/// Logging for every binary; filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

/// Build the backend client described by `cfg`. With `offline.enabled` the
/// transport goes through a registered [`OfflineCache`] persisted under the
/// data directory (`EQUIPQR_CACHE_URL` overrides the database location).
pub async fn connect(cfg: &Config) -> Result<ApiClient> {
    let base_url = cfg.base_url()?;
    let http: Arc<dyn Fetcher> =
        Arc::new(HttpFetcher::new().context("failed to build HTTP client")?);

    if !cfg.offline.enabled {
        return Ok(ApiClient::new(http, base_url));
    }

    let database_url =
        std::env::var("EQUIPQR_CACHE_URL").unwrap_or_else(|_| cfg.cache_db_url());
    let storage = SqliteCacheStorage::connect(&database_url)
        .await
        .with_context(|| format!("failed to open offline cache at {}", database_url))?;
    let cache = OfflineCache::new(http, Arc::new(storage), base_url.clone())
        .with_cache_name(cfg.offline.cache_name.clone())
        .with_policy(cfg.cache_policy()?)
        .with_precache(cfg.offline.precache.clone());
    match cache.register().await {
        Ok(()) => info!(cache = cache.cache_name(), "offline cache active"),
        Err(err) => warn!(?err, "offline cache not registered; requests go straight to the network"),
    }
    Ok(ApiClient::new(Arc::new(cache), base_url))
}
