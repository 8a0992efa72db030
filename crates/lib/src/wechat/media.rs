//! Media library uploads (permanent material) for image replies.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Refresh the access token this long before WeChat says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// errcodes meaning the cached access token is no longer accepted.
const STALE_TOKEN_CODES: &[i64] = &[40001, 40014, 42001];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("wechat request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("wechat api error: errcode={code}, errmsg={message}")]
    Api { code: i64, message: String },
    #[error("reading image file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected wechat response: {0}")]
    Unexpected(String),
}

/// Stores an image in the platform media library and returns its media id.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload_image(&self, path: &Path) -> Result<String, UploadError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddMaterialResponse {
    #[serde(default)]
    media_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Official account API client for `add_material`. Caches the access token in memory.
pub struct WechatMediaClient {
    base_url: String,
    app_id: String,
    app_secret: String,
    client: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl WechatMediaClient {
    /// `timeout` bounds each call: the token fetch and the upload.
    pub fn new(
        base_url: &str,
        app_id: &str,
        app_secret: &str,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    /// Cached token when still fresh, otherwise a new one from `/cgi-bin/token`.
    async fn access_token(&self) -> Result<String, UploadError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }
        let mut slot = self.token.write().await;
        // Another request may have refreshed while we waited for the write lock.
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }
        let url = format!("{}/cgi-bin/token", self.base_url);
        let res = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.as_str()),
            ])
            .send()
            .await?;
        let data: TokenResponse = res.json().await?;
        if let Some(code) = data.errcode.filter(|c| *c != 0) {
            return Err(UploadError::Api {
                code,
                message: data.errmsg.unwrap_or_default(),
            });
        }
        let token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UploadError::Unexpected("token response without access_token".to_string()))?;
        let ttl = Duration::from_secs(data.expires_in.unwrap_or(7200)).saturating_sub(TOKEN_REFRESH_MARGIN);
        *slot = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
        });
        log::debug!("wechat access token refreshed, valid for {}s", ttl.as_secs());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }
}

#[async_trait]
impl MediaUploader for WechatMediaClient {
    async fn upload_image(&self, path: &Path) -> Result<String, UploadError> {
        let token = self.access_token().await?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(image_mime(path))?;
        let form = reqwest::multipart::Form::new().part("media", part);
        let url = format!("{}/cgi-bin/material/add_material", self.base_url);
        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await?;
        let data: AddMaterialResponse = res.json().await?;
        if let Some(code) = data.errcode.filter(|c| *c != 0) {
            if STALE_TOKEN_CODES.contains(&code) {
                self.invalidate_token().await;
            }
            return Err(UploadError::Api {
                code,
                message: data.errmsg.unwrap_or_default(),
            });
        }
        let media_id = data
            .media_id
            .filter(|m| !m.is_empty())
            .ok_or_else(|| UploadError::Unexpected("add_material response without media_id".to_string()))?;
        log::debug!("uploaded media {} ({})", media_id, data.url.as_deref().unwrap_or(""));
        Ok(media_id)
    }
}

fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
