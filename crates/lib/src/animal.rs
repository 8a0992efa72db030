//! Random animal picture: fetch a fact, download its image, upload it as media, reply with the image.
//!
//! Every step can fail; each failure ends the flow with a text reply naming the step.

use crate::wechat::{MediaUploader, Reply, UploadError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;

pub const LINK_PARSE_FAILED: &str = "解析动物图片链接失败";

/// Image types WeChat accepts for permanent material; others are uploaded as `.jpg`.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// Response of the animal API. Only `image_link` matters; everything else is informational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnimalFact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_link: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
}

/// Failures of the animal flow, rendered as the reply text.
#[derive(Debug, thiserror::Error)]
pub enum AnimalError {
    #[error("请求动物失败: {0}")]
    Fetch(FetchError),
    #[error("解析动物图片链接失败")]
    MissingLink,
    #[error("下载图片失败: {0}")]
    Download(FetchError),
    #[error("创建临时文件失败: {0}")]
    TempFile(std::io::Error),
    #[error("写入临时文件失败: {0}")]
    WriteFile(std::io::Error),
    #[error("上传到媒体库失败: {0}")]
    Upload(UploadError),
}

/// Source of random animals and their pictures.
#[async_trait]
pub trait AnimalFetcher: Send + Sync {
    /// A random animal. Malformed responses yield an empty fact rather than an error.
    async fn random_animal(&self) -> Result<AnimalFact, FetchError>;

    /// Raw bytes of the image at `url`.
    async fn download_image(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Unauthenticated HTTP fetcher. Both calls share one client with a fixed timeout.
pub struct HttpAnimalFetcher {
    api_url: String,
    client: reqwest::Client,
}

impl HttpAnimalFetcher {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl AnimalFetcher for HttpAnimalFetcher {
    async fn random_animal(&self) -> Result<AnimalFact, FetchError> {
        let res = self.client.get(&self.api_url).send().await?;
        let body = res.text().await?;
        match serde_json::from_str::<AnimalFact>(&body) {
            Ok(fact) => Ok(fact),
            Err(e) => {
                log::warn!("animal api returned unparseable body: {}", e);
                Ok(AnimalFact::default())
            }
        }
    }

    async fn download_image(&self, url: &str) -> Result<Bytes, FetchError> {
        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(FetchError::Status(res.status()));
        }
        Ok(res.bytes().await?)
    }
}

/// Extension for the transient file, from the image URL path when it is a known image type.
fn image_suffix(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let ext = last
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string());
    format!(".{}", ext)
}

/// Download `image_url` into a transient file and upload it. The file is removed when this returns,
/// whatever the outcome.
pub async fn download_and_upload(
    fetcher: &dyn AnimalFetcher,
    uploader: &dyn MediaUploader,
    image_url: &str,
) -> Result<String, AnimalError> {
    log::debug!("animal: downloading {}", image_url);
    let bytes = fetcher
        .download_image(image_url)
        .await
        .map_err(AnimalError::Download)?;
    let mut file = tempfile::Builder::new()
        .prefix("animal-")
        .suffix(&image_suffix(image_url))
        .tempfile()
        .map_err(AnimalError::TempFile)?;
    file.write_all(&bytes)
        .and_then(|_| file.flush())
        .map_err(AnimalError::WriteFile)?;
    let media_id = uploader
        .upload_image(file.path())
        .await
        .map_err(AnimalError::Upload)?;
    Ok(media_id)
}

async fn fetch_and_upload(
    fetcher: &dyn AnimalFetcher,
    uploader: &dyn MediaUploader,
) -> Result<String, AnimalError> {
    let fact = fetcher.random_animal().await.map_err(AnimalError::Fetch)?;
    if fact.image_link.trim().is_empty() {
        return Err(AnimalError::MissingLink);
    }
    log::debug!("animal: got {}", fact.name);
    download_and_upload(fetcher, uploader, fact.image_link.trim()).await
}

/// The animal command. Always yields a reply: the picture, or text describing the failed step.
pub async fn reply_for_animal(fetcher: &dyn AnimalFetcher, uploader: &dyn MediaUploader) -> Reply {
    match fetch_and_upload(fetcher, uploader).await {
        Ok(media_id) => Reply::image(media_id),
        Err(e) => {
            log::warn!("animal command failed: {}", e);
            Reply::text(e.to_string())
        }
    }
}
