//! Which requests the offline worker handles, and how.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::http::FetchRequest;

/// Build-hashed application bundles. They change on every deploy, so the
/// freshest copy wins.
static IMMUTABLE_BUNDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(IMMUTABLE_BUNDLE_PATTERN).expect("static pattern"));

/// Backend endpoints answer per session and change underneath us; a cached
/// copy is only good for when the network is gone.
static BACKEND_API: Lazy<Regex> =
    Lazy::new(|| Regex::new(BACKEND_API_PATTERN).expect("static pattern"));

pub const IMMUTABLE_BUNDLE_PATTERN: &str = "/_app/immutable/";
pub const BACKEND_API_PATTERN: &str = "^/(api|equipment)/";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
}

/// Ordered `(pattern, strategy)` table; the first pattern found in the URL
/// path decides, otherwise `fallback` applies.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    rules: Vec<(Regex, Strategy)>,
    fallback: Strategy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                (IMMUTABLE_BUNDLE.clone(), Strategy::NetworkFirst),
                (BACKEND_API.clone(), Strategy::NetworkFirst),
            ],
            fallback: Strategy::CacheFirst,
        }
    }
}

impl CachePolicy {
    pub fn new(fallback: Strategy) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn with_rule(mut self, pattern: &str, strategy: Strategy) -> Result<Self, regex::Error> {
        self.rules.push((Regex::new(pattern)?, strategy));
        Ok(self)
    }

    pub fn strategy_for(&self, url: &Url) -> Strategy {
        let path = url.path();
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(path))
            .map(|(_, strategy)| *strategy)
            .unwrap_or(self.fallback)
    }
}

/// Only plain GETs over http(s) go through the cache. Writes and
/// browser-internal schemes are passed through untouched.
pub fn is_interceptable(request: &FetchRequest) -> bool {
    request.method == Method::GET && matches!(request.url.scheme(), "http" | "https")
}

/// Cache key: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}
