//! Network seam: every backend call is a [`FetchRequest`] handed to a [`Fetcher`].
//!
//! The real transport is [`HttpFetcher`]. The offline cache worker wraps any
//! other fetcher and implements the same trait, so callers never know whether
//! a response came from the network or from the cache.
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    /// Any other request issued by the client.
    Fetch,
}

/// One file field of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    /// Read `path` into a part of the `files` field used by attachment uploads.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        Ok(Self {
            field: "files".to_string(),
            file_name,
            content_type: content_type_for(path).to_string(),
            bytes,
        })
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "mp4" => "video/mp4",
        Some(ext) if ext == "mov" => "video/quicktime",
        Some(ext) if ext == "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Multipart(Vec<FilePart>),
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub body: Option<RequestBody>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Fetch,
            body: None,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn post(url: Url) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn post_json(url: Url, body: Value) -> Self {
        Self {
            body: Some(RequestBody::Json(body)),
            ..Self::post(url)
        }
    }

    pub fn post_multipart(url: Url, parts: Vec<FilePart>) -> Self {
        Self {
            body: Some(RequestBody::Multipart(parts)),
            ..Self::post(url)
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A fully buffered response. Buffering keeps responses cloneable so the
/// cache worker can store one copy and hand another to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_owned),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, Some("application/json"), value.to_string())
    }

    /// Placeholder served when the network is down and nothing is cached.
    pub fn offline() -> Self {
        Self::new(503, Some("text/plain"), "Offline and not cached")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    /// A network-first asset could not be fetched and no copy was cached.
    #[error("asset unavailable offline: {0}")]
    AssetUnavailable(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed transport. Cookies set by the backend are kept in the
/// client and sent back with every later request.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("equipqr/0.1")
            .cookie_store(true)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!(method=%request.method, url=%request.url, "sending request");
        let mut builder = self.http.request(request.method, request.url);
        if request.mode == RequestMode::Navigate {
            builder = builder.header(ACCEPT, "text/html");
        }
        match request.body {
            Some(RequestBody::Json(body)) => builder = builder.json(&body),
            Some(RequestBody::Multipart(parts)) => {
                let mut form = Form::new();
                for part in parts {
                    let file = Part::bytes(part.bytes)
                        .file_name(part.file_name)
                        .mime_str(&part.content_type)
                        .map_err(|err| FetchError::Network(err.to_string()))?;
                    form = form.part(part.field, file);
                }
                builder = builder.multipart(form);
            }
            None => {}
        }

        let res = builder
            .send()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let status = res.status().as_u16();
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = res
            .bytes()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        debug!(status, bytes = body.len(), "received response");
        Ok(FetchResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}
