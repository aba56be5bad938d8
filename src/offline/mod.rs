//! Offline cache worker: a caching proxy in front of the network fetcher.
//!
//! After [`OfflineCache::register`] has precached the app shell and dropped
//! stale cache versions, every GET is served according to the
//! [`CachePolicy`]. Writes and non-http schemes always go straight to the
//! network.
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::http::{FetchError, FetchRequest, FetchResponse, Fetcher};

use self::policy::{cache_key, is_interceptable, CachePolicy, Strategy};
use self::store::{CacheError, CacheStorage};

pub mod policy;
pub mod store;

pub const DEFAULT_CACHE_NAME: &str = "equipqr-cache-v1";

/// App shell fetched on install.
pub const DEFAULT_PRECACHE: [&str; 4] = ["/", "/index.html", "/favicon.ico", "/manifest.webmanifest"];

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to precache {url}: {reason}")]
    Precache { url: String, reason: String },
    #[error("invalid precache path '{0}'")]
    InvalidPath(String),
    #[error("worker must be installed before it is activated")]
    NotInstalled,
    #[error(transparent)]
    Storage(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    New,
    Installed,
    Activated,
}

pub struct OfflineCache {
    network: Arc<dyn Fetcher>,
    storage: Arc<dyn CacheStorage>,
    origin: Url,
    cache_name: String,
    policy: CachePolicy,
    precache: Vec<String>,
    state: RwLock<WorkerState>,
}

impl fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCache")
            .field("origin", &self.origin.origin().ascii_serialization())
            .field("cache_name", &self.cache_name)
            .finish_non_exhaustive()
    }
}

impl OfflineCache {
    pub fn new(network: Arc<dyn Fetcher>, storage: Arc<dyn CacheStorage>, origin: Url) -> Self {
        Self {
            network,
            storage,
            origin,
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            policy: CachePolicy::default(),
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            state: RwLock::new(WorkerState::New),
        }
    }

    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_precache(mut self, paths: Vec<String>) -> Self {
        self.precache = paths;
        self
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Install and activate without waiting for older workers to go away.
    /// When the install fails but this cache version was installed by an
    /// earlier run, that copy keeps serving.
    pub async fn register(&self) -> Result<(), WorkerError> {
        if let Err(err) = self.install().await {
            let existing = self.storage.cache_names().await?;
            if !existing.iter().any(|name| name == &self.cache_name) {
                return Err(err);
            }
            warn!(%err, "install failed; reusing the installed cache");
            *self.state.write().await = WorkerState::Installed;
        }
        self.activate().await
    }

    /// Fetch every shell asset and store them together. One failed or
    /// non-2xx fetch fails the install and nothing is stored.
    #[instrument(skip_all, fields(cache = %self.cache_name))]
    pub async fn install(&self) -> Result<(), WorkerError> {
        let urls = self
            .precache
            .iter()
            .map(|path| {
                self.origin
                    .join(path)
                    .map_err(|_| WorkerError::InvalidPath(path.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = urls.into_iter().map(|url| async move {
            let res = self
                .network
                .fetch(FetchRequest::get(url.clone()))
                .await
                .map_err(|err| WorkerError::Precache {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
            if !res.is_success() {
                return Err(WorkerError::Precache {
                    url: url.to_string(),
                    reason: format!("status {}", res.status),
                });
            }
            Ok((cache_key(&url), res))
        });
        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(?err, "install failed");
                return Err(err);
            }
        };

        self.storage.open(&self.cache_name).await?;
        self.storage.put_all(&self.cache_name, &entries).await?;
        *self.state.write().await = WorkerState::Installed;
        info!(assets = entries.len(), "installed");
        Ok(())
    }

    /// Delete every cache but the current one and start serving requests.
    #[instrument(skip_all, fields(cache = %self.cache_name))]
    pub async fn activate(&self) -> Result<(), WorkerError> {
        let mut state = self.state.write().await;
        if *state == WorkerState::New {
            return Err(WorkerError::NotInstalled);
        }
        for name in self.storage.cache_names().await? {
            if name != self.cache_name {
                self.storage.delete_cache(&name).await?;
                info!(stale = %name, "deleted stale cache");
            }
        }
        *state = WorkerState::Activated;
        info!("activated");
        Ok(())
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    async fn cached(&self, key: &str) -> Option<FetchResponse> {
        match self.storage.lookup(&self.cache_name, key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(?err, key, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &str, url: &Url, response: &FetchResponse) {
        if !response.is_success() || !self.is_same_origin(url) {
            return;
        }
        if let Err(err) = self.storage.put(&self.cache_name, key, response).await {
            warn!(?err, key, "cache write failed");
        }
    }

    async fn network_first(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.clone();
        let key = cache_key(&url);
        match self.network.fetch(request).await {
            Ok(res) => {
                self.store(&key, &url, &res).await;
                Ok(res)
            }
            Err(err) => match self.cached(&key).await {
                Some(hit) => {
                    debug!(%key, "network failed; serving cached copy");
                    Ok(hit)
                }
                None => {
                    warn!(%key, %err, "network failed with no cached copy");
                    Err(FetchError::AssetUnavailable(key))
                }
            },
        }
    }

    async fn cache_first(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.clone();
        let key = cache_key(&url);
        if let Some(hit) = self.cached(&key).await {
            debug!(%key, "cache hit");
            return Ok(hit);
        }

        let navigation = request.is_navigation();
        match self.network.fetch(request).await {
            Ok(res) => {
                self.store(&key, &url, &res).await;
                Ok(res)
            }
            Err(err) => {
                warn!(%key, %err, "fetch failed with no cached copy");
                if navigation {
                    if let Ok(root) = self.origin.join("/") {
                        if let Some(shell) = self.cached(&cache_key(&root)).await {
                            return Ok(shell);
                        }
                    }
                }
                Ok(FetchResponse::offline())
            }
        }
    }
}

#[async_trait]
impl Fetcher for OfflineCache {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        if *self.state.read().await != WorkerState::Activated || !is_interceptable(&request) {
            return self.network.fetch(request).await;
        }
        match self.policy.strategy_for(&request.url) {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        }
    }
}
